// one device attached through the tunnel

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use mio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

use crate::binary;
use crate::buffer::{Ipv4PacketBuffer, StreamBuffer};
use crate::capture::PacketCapture;
use crate::config::{RelayConfig, CLIENT_BUFFER_SIZE};
use crate::connection::ConnectionId;
use crate::error::Result;
use crate::packet::Ipv4Packet;
use crate::router::Router;
use crate::selector::{interest_of, Ready, Registrant, SelectionKey, Selector};

/// Hands out client ids, starting at 1.
#[derive(Debug, Default)]
pub struct ClientIdAllocator {
    last: AtomicU32,
}

impl ClientIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> u32 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A producer of packets for the device which may have to wait for room in
/// the client buffer.
pub trait PacketSource {
    fn connection_id(&self) -> ConnectionId;

    /// The packet to deliver next, if any.
    fn get(&self) -> Option<&Ipv4Packet>;

    /// Called once the packet returned by [`get`](Self::get) has been delivered.
    fn next(&mut self, selector: &mut Selector);
}

/// Lookup of the sources waiting for room.
pub trait PacketSources {
    fn find(&mut self, id: ConnectionId) -> Option<&mut dyn PacketSource>;
}

/// Outbound half of a client: the byte stream to the device plus the
/// sources waiting to write into it, in arrival order.
pub struct ClientSink {
    client_id: u32,
    network_to_client: StreamBuffer,
    pending_packet_sources: VecDeque<ConnectionId>,
    capture: Option<PacketCapture>,
}

impl ClientSink {
    pub fn new(client_id: u32, capacity: usize, capture: Option<PacketCapture>) -> Self {
        ClientSink {
            client_id,
            network_to_client: StreamBuffer::new(capacity),
            pending_packet_sources: VecDeque::new(),
            capture,
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn is_empty(&self) -> bool {
        self.network_to_client.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.network_to_client.remaining()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_packet_sources.len()
    }

    pub fn is_pending(&self, id: &ConnectionId) -> bool {
        self.pending_packet_sources.contains(id)
    }

    /// Whether `id` may write now without passing a source queued before it.
    pub fn is_first_in_line(&self, id: &ConnectionId) -> bool {
        self.pending_packet_sources
            .front()
            .map_or(true, |front| front == id)
    }

    /// Queue raw bytes which are not a packet (the client id header).
    fn push_raw(&mut self, data: &[u8]) -> bool {
        if self.network_to_client.remaining() < data.len() {
            return false;
        }
        self.network_to_client.read_from(data);
        true
    }

    /// Queue a packet entirely, or not at all.
    pub fn send_to_client(&mut self, packet: &Ipv4Packet) -> bool {
        if self.network_to_client.remaining() < packet.length() {
            debug!(
                "Client #{}: buffer full, cannot send packet ({} bytes)",
                self.client_id,
                packet.length()
            );
            return false;
        }
        self.network_to_client.read_from(packet.raw());
        if let Some(capture) = &self.capture {
            capture.write(packet.raw());
        }
        trace!(
            "Client #{}: packet to client {}",
            self.client_id,
            binary::build_packet_string(packet.raw())
        );
        true
    }

    /// Deliver what `source` has right now; if the buffer is full, remember
    /// the source so that it is retried once room is available.
    pub fn consume<S: PacketSource + ?Sized>(
        &mut self,
        source: &mut S,
        selector: &mut Selector,
    ) -> bool {
        while let Some(packet) = source.get() {
            if !self.send_to_client(packet) {
                let id = source.connection_id();
                if !self.pending_packet_sources.contains(&id) {
                    self.pending_packet_sources.push_back(id);
                }
                return false;
            }
            source.next(selector);
        }
        true
    }

    /// Retry the waiting sources in order, stopping at the first one which
    /// still does not fit.
    pub fn process_pending<P: PacketSources + ?Sized>(
        &mut self,
        sources: &mut P,
        selector: &mut Selector,
    ) {
        while let Some(&id) = self.pending_packet_sources.front() {
            if let Some(source) = sources.find(id) {
                while let Some(packet) = source.get() {
                    let length = packet.length();
                    if !self.send_to_client(packet) {
                        debug!(
                            "Client #{}: pending packet not sent ({} bytes)",
                            self.client_id, length
                        );
                        return;
                    }
                    debug!(
                        "Client #{}: pending packet sent ({} bytes)",
                        self.client_id, length
                    );
                    source.next(selector);
                }
            }
            self.pending_packet_sources.pop_front();
        }
    }

    pub fn write_to<W: Write>(&mut self, sink: &mut W) -> io::Result<usize> {
        self.network_to_client.write_to(sink)
    }
}

pub struct Client {
    id: u32,
    stream: TcpStream,
    selection_key: SelectionKey,
    client_to_network: Ipv4PacketBuffer,
    sink: ClientSink,
    router: Router,
    capture: Option<PacketCapture>,
    closed: bool,
}

impl Client {
    pub fn new(
        id: u32,
        mut stream: TcpStream,
        selector: &mut Selector,
        config: &RelayConfig,
        capture: Option<PacketCapture>,
    ) -> Result<Self> {
        let mut sink = ClientSink::new(id, CLIENT_BUFFER_SIZE, capture.clone());
        // the device learns its id before any packet
        sink.push_raw(&id.to_be_bytes());
        let selection_key = SelectionKey::register(
            selector,
            &mut stream,
            interest_of(true, true),
            Registrant::Client(id),
        )?;
        Ok(Client {
            id,
            stream,
            selection_key,
            client_to_network: Ipv4PacketBuffer::new(),
            sink,
            router: Router::new(id, config.udp_idle_timeout),
            capture,
            closed: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn on_ready(&mut self, selector: &mut Selector, ready: Ready) {
        if self.closed {
            return;
        }
        if ready.contains(Ready::WRITABLE) {
            self.process_send(selector);
        }
        if !self.closed && ready.intersects(Ready::READABLE | Ready::HUP | Ready::ERROR) {
            self.process_receive(selector);
        }
        self.flush_and_update(selector);
    }

    pub fn on_connection_ready(&mut self, selector: &mut Selector, id: ConnectionId, ready: Ready) {
        if self.closed {
            return;
        }
        self.router.on_ready(selector, &mut self.sink, id, ready);
        self.flush_and_update(selector);
    }

    pub fn clean_expired_connections(&mut self, selector: &mut Selector, now: Instant) {
        self.router.clean_expired_connections(selector, now);
    }

    fn process_receive(&mut self, selector: &mut Selector) {
        loop {
            match self.client_to_network.read_from(&mut self.stream) {
                Ok(0) => {
                    info!("Client #{}: tunnel closed by the device", self.id);
                    self.close(selector);
                    return;
                }
                Ok(_) => {
                    if !self.push_to_network(selector) {
                        return;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    error!("Client #{}: cannot read: {}", self.id, e);
                    self.close(selector);
                    return;
                }
            }
        }
    }

    fn push_to_network(&mut self, selector: &mut Selector) -> bool {
        loop {
            match self.client_to_network.as_ipv4_packet() {
                Ok(Some(packet)) => {
                    if let Some(capture) = &self.capture {
                        capture.write(packet.raw());
                    }
                    self.router
                        .send_to_network(selector, &mut self.sink, packet);
                }
                Ok(None) => return true,
                Err(err) => {
                    error!("Client #{}: unusable tunnel stream: {}", self.id, err);
                    self.close(selector);
                    return false;
                }
            }
        }
    }

    fn process_send(&mut self, selector: &mut Selector) {
        match self.sink.write_to(&mut self.stream) {
            Ok(w) => {
                if w > 0 {
                    self.sink.process_pending(&mut self.router, selector);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                error!("Client #{}: cannot write: {}", self.id, e);
                self.close(selector);
            }
        }
    }

    fn flush_and_update(&mut self, selector: &mut Selector) {
        if !self.closed && !self.sink.is_empty() {
            self.process_send(selector);
        }
        if self.closed {
            return;
        }
        let interest = interest_of(true, !self.sink.is_empty());
        if let Err(err) = self
            .selection_key
            .set_interest(selector, &mut self.stream, interest)
        {
            error!("Client #{}: cannot update interests: {}", self.id, err);
            self.close(selector);
        }
    }

    fn close(&mut self, selector: &mut Selector) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.selection_key.cancel(selector, &mut self.stream);
        if let Err(err) = self.stream.shutdown(std::net::Shutdown::Both) {
            if err.kind() != io::ErrorKind::NotConnected {
                warn!("Client #{}: cannot shutdown tunnel: {}", self.id, err);
            }
        }
        self.router.clear(selector);
        info!("Client #{} disconnected", self.id);
    }
}
