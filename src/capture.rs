// optional pcap capture of every packet crossing the tunnel

use std::cell::RefCell;
use std::fs::File;
use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::DataLink;
use tracing::{info, warn};

use crate::error::{RelayError, Result};
use crate::packet::MAX_PACKET_LENGTH;

/// Shared handle on the capture file.
///
/// Clones write to the same file; the relay is single-threaded so the writer
/// is only ever borrowed for the duration of one packet.
#[derive(Clone)]
pub struct PacketCapture {
    writer: Rc<RefCell<Option<PcapWriter<File>>>>,
}

impl PacketCapture {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        // raw ip: the tunnel carries no link layer
        let header = PcapHeader {
            snaplen: MAX_PACKET_LENGTH as u32,
            datalink: DataLink::RAW,
            ..Default::default()
        };
        let writer = PcapWriter::with_header(file, header)
            .map_err(|e| RelayError::Capture(e.to_string()))?;
        info!("Capturing packets to {}", path.display());
        Ok(PacketCapture {
            writer: Rc::new(RefCell::new(Some(writer))),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.borrow().is_some()
    }

    /// Append one packet; the first failure disables the capture.
    pub fn write(&self, data: &[u8]) {
        let mut writer = self.writer.borrow_mut();
        let Some(pcap) = writer.as_mut() else {
            return;
        };
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let packet = PcapPacket::new(timestamp, data.len() as u32, data);
        if let Err(err) = pcap.write_packet(&packet) {
            warn!("Cannot write capture, disabling it: {}", err);
            *writer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcap_file::pcap::PcapReader;

    #[test]
    fn test_capture_round_trip() {
        let path = std::env::temp_dir().join(format!("revtether-capture-{}.pcap", std::process::id()));
        {
            let capture = PacketCapture::create(&path).unwrap();
            let shared = capture.clone();
            capture.write(&[0x45, 0, 0, 20]);
            shared.write(&[0x45, 0, 0, 21, 1]);
            assert!(capture.is_enabled());
        }

        let mut reader = PcapReader::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(reader.header().datalink, DataLink::RAW);
        let first = reader.next_packet().unwrap().unwrap();
        assert_eq!(&first.data[..], &[0x45, 0, 0, 20]);
        let second = reader.next_packet().unwrap().unwrap();
        assert_eq!(second.orig_len, 5);
        assert!(reader.next_packet().is_none());
        std::fs::remove_file(&path).unwrap();
    }
}
