// hex rendering of raw packets for trace logs

use std::fmt::Write;

const MAX_STRING_PACKET_SIZE: usize = 20;

/// Render at most the first 20 bytes, grouped by 4, prefixed by the full length.
pub fn build_packet_string(data: &[u8]) -> String {
    let limit = data.len().min(MAX_STRING_PACKET_SIZE);
    let mut s = format!("[{} bytes] ", data.len());
    for (i, byte) in data[..limit].iter().enumerate() {
        if i != 0 {
            s.push_str(if i % 4 == 0 { "  " } else { " " });
        }
        let _ = write!(s, "{:02X}", byte);
    }
    if limit < data.len() {
        let _ = write!(s, "  ... +{} bytes", data.len() - limit);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_packet() {
        assert_eq!(build_packet_string(&[0x45, 0x00, 0x01]), "[3 bytes] 45 00 01");
    }

    #[test]
    fn test_long_packet_is_cut() {
        let data: Vec<u8> = (0..24).collect();
        assert_eq!(
            build_packet_string(&data),
            "[24 bytes] 00 01 02 03  04 05 06 07  08 09 0A 0B  0C 0D 0E 0F  10 11 12 13  ... +4 bytes"
        );
    }

    #[test]
    fn test_empty() {
        assert_eq!(build_packet_string(&[]), "[0 bytes] ");
    }
}
