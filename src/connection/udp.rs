// udp flows: one connected socket per device five-tuple

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use mio::net::UdpSocket;
use mio::Interest;
use tracing::{debug, error, info, warn};

use crate::buffer::DatagramBuffer;
use crate::client::PacketSource;
use crate::config::CONNECTION_BUFFER_SIZE;
use crate::error::{RelayError, Result};
use crate::packet::Ipv4Packet;
use crate::packetizer::Packetizer;
use crate::selector::{interest_of, Ready, Registrant, SelectionKey, Selector};

use super::{ConnectionId, Context};

pub struct UdpConnection {
    id: ConnectionId,
    client_id: u32,
    socket: UdpSocket,
    selection_key: SelectionKey,
    client_to_network: DatagramBuffer,
    network_to_client: Packetizer,
    packet_for_client: Option<Ipv4Packet>,
    idle_since: Instant,
    idle_timeout: Duration,
    closed: bool,
}

impl UdpConnection {
    pub fn new(
        id: ConnectionId,
        client_id: u32,
        reference: &Ipv4Packet,
        selector: &mut Selector,
        idle_timeout: Duration,
    ) -> Result<Self> {
        let network_to_client = Packetizer::new(reference)?;
        let mut socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        socket.connect(id.rewritten_destination())?;
        let selection_key = SelectionKey::register(
            selector,
            &mut socket,
            Some(Interest::READABLE),
            Registrant::Connection(client_id, id),
        )?;
        Ok(UdpConnection {
            id,
            client_id,
            socket,
            selection_key,
            client_to_network: DatagramBuffer::new(CONNECTION_BUFFER_SIZE),
            network_to_client,
            packet_for_client: None,
            idle_since: Instant::now(),
            idle_timeout,
            closed: false,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn idle_since(&self) -> Instant {
        self.idle_since
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.idle_since) >= self.idle_timeout
    }

    fn touch(&mut self) {
        self.idle_since = Instant::now();
    }

    pub fn send_to_network(&mut self, cx: &mut Context<'_>, packet: &Ipv4Packet) {
        if self.closed {
            return;
        }
        self.touch();
        match self.client_to_network.read_from(packet.payload()) {
            Ok(()) => {}
            Err(RelayError::BufferFull) => {
                warn!(
                    "Client #{}: {} cannot send to network, drop packet",
                    self.client_id, self.id
                );
            }
            Err(err) => {
                warn!("Client #{}: {} drop packet: {}", self.client_id, self.id, err);
            }
        }
        self.update_interests(cx.selector);
    }

    pub fn on_ready(&mut self, cx: &mut Context<'_>, ready: Ready) {
        if self.closed {
            return;
        }
        self.touch();
        if ready.contains(Ready::WRITABLE) {
            self.process_send(cx);
        }
        if !self.closed && ready.intersects(Ready::READABLE | Ready::ERROR) && self.may_read() {
            self.process_receive(cx);
        }
        if !self.closed {
            self.update_interests(cx.selector);
        }
    }

    pub fn disconnect(&mut self, selector: &mut Selector) {
        if self.selection_key.is_valid() {
            self.selection_key.cancel(selector, &mut self.socket);
        }
        self.closed = true;
        info!("Client #{}: {} Close", self.client_id, self.id);
    }

    fn process_send(&mut self, cx: &mut Context<'_>) {
        let socket = &self.socket;
        while !self.client_to_network.is_empty() {
            match self.client_to_network.write_to(|datagram| socket.send(datagram)) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Client #{}: {} datagram truncated", self.client_id, self.id);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    error!("Client #{}: {} cannot write: {}", self.client_id, self.id, err);
                    self.disconnect(cx.selector);
                    return;
                }
            }
        }
    }

    fn process_receive(&mut self, cx: &mut Context<'_>) {
        let max_payload_length = self.network_to_client.max_payload_length();
        let buffer = self.network_to_client.payload_buffer(max_payload_length);
        match self.socket.recv(buffer) {
            Ok(r) => {
                debug!("Client #{}: {} received {} bytes", self.client_id, self.id, r);
                self.packet_for_client = Some(self.network_to_client.inflate(r));
                cx.sink.consume(self, cx.selector);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                error!("Client #{}: {} cannot read: {}", self.client_id, self.id, err);
                self.disconnect(cx.selector);
            }
        }
    }

    fn may_read(&self) -> bool {
        self.packet_for_client.is_none()
    }

    fn update_interests(&mut self, selector: &mut Selector) {
        let interest = interest_of(self.may_read(), !self.client_to_network.is_empty());
        if let Err(err) = self
            .selection_key
            .set_interest(selector, &mut self.socket, interest)
        {
            error!(
                "Client #{}: {} cannot update interests: {}",
                self.client_id, self.id, err
            );
        }
    }
}

impl PacketSource for UdpConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn get(&self) -> Option<&Ipv4Packet> {
        self.packet_for_client.as_ref()
    }

    fn next(&mut self, selector: &mut Selector) {
        self.packet_for_client = None;
        if !self.closed {
            self.update_interests(selector);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientSink;
    use crate::packet::TransportHeader;
    use etherparse::PacketBuilder;
    use mio::Events;

    fn device_datagram(port: u16, payload: &[u8]) -> Ipv4Packet {
        let mut raw = Vec::new();
        PacketBuilder::ipv4([10, 0, 2, 15], [10, 0, 2, 2], 64)
            .udp(5353, port)
            .write(&mut raw, payload)
            .unwrap();
        Ipv4Packet::parse(raw).unwrap()
    }

    fn open(
        selector: &mut Selector,
        port: u16,
        idle_timeout: Duration,
    ) -> (UdpConnection, Ipv4Packet) {
        let packet = device_datagram(port, b"ping");
        let id = ConnectionId::from_packet(&packet).unwrap();
        let connection = UdpConnection::new(id, 1, &packet, selector, idle_timeout).unwrap();
        (connection, packet)
    }

    #[test]
    fn test_echo() {
        let server = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = server.local_addr().unwrap().port();

        let mut selector = Selector::new().unwrap();
        let mut sink = ClientSink::new(1, 1 << 20, None);
        let (mut connection, packet) = open(&mut selector, port, Duration::from_secs(120));
        let mut cx = Context {
            selector: &mut selector,
            sink: &mut sink,
        };
        connection.send_to_network(&mut cx, &packet);

        let mut events = Events::with_capacity(16);
        let mut buf = [0u8; 64];
        let mut peer = None;
        let deadline = Instant::now() + Duration::from_secs(5);
        // flush the datagram to the network
        while peer.is_none() {
            assert!(Instant::now() < deadline, "timeout");
            selector
                .select(&mut events, Some(Duration::from_millis(100)))
                .unwrap();
            for event in events.iter() {
                let mut cx = Context {
                    selector: &mut selector,
                    sink: &mut sink,
                };
                connection.on_ready(&mut cx, Ready::from(event));
            }
            if connection.client_to_network.is_empty() {
                let (n, from) = server.recv_from(&mut buf).unwrap();
                assert_eq!(&buf[..n], b"ping");
                peer = Some(from);
            }
        }

        server.send_to(b"pong!", peer.unwrap()).unwrap();
        while sink.is_empty() {
            assert!(Instant::now() < deadline, "timeout");
            selector
                .select(&mut events, Some(Duration::from_millis(100)))
                .unwrap();
            for event in events.iter() {
                let mut cx = Context {
                    selector: &mut selector,
                    sink: &mut sink,
                };
                connection.on_ready(&mut cx, Ready::from(event));
            }
        }

        let mut raw = Vec::new();
        sink.write_to(&mut raw).unwrap();
        let response = Ipv4Packet::parse(raw).unwrap();
        assert_eq!(response.payload(), b"pong!");
        match response.transport_header() {
            Some(TransportHeader::Udp(udp)) => {
                assert_eq!(udp.source_port(), port);
                assert_eq!(udp.destination_port(), 5353);
            }
            other => panic!("unexpected transport header {:?}", other),
        }
        assert_eq!(
            Ipv4Addr::from(response.ipv4_header().source()),
            Ipv4Addr::new(10, 0, 2, 2)
        );
    }

    #[test]
    fn test_expiration() {
        let mut selector = Selector::new().unwrap();
        let (connection, _) = open(&mut selector, 9, Duration::from_secs(120));
        let start = connection.idle_since();
        assert!(!connection.is_expired(start + Duration::from_secs(119)));
        assert!(connection.is_expired(start + Duration::from_secs(120)));
        assert!(!connection.is_expired(start - Duration::from_secs(1)));
    }

    #[test]
    fn test_traffic_resets_idle_clock() {
        let mut selector = Selector::new().unwrap();
        let mut sink = ClientSink::new(1, 1 << 20, None);
        let (mut connection, packet) = open(&mut selector, 9, Duration::from_secs(120));
        let before = connection.idle_since();
        std::thread::sleep(Duration::from_millis(20));
        let mut cx = Context {
            selector: &mut selector,
            sink: &mut sink,
        };
        connection.send_to_network(&mut cx, &packet);
        assert!(connection.idle_since() > before);
        assert!(!connection.is_expired(before + Duration::from_secs(120)));
    }

    #[test]
    fn test_disconnect_releases_registration() {
        let mut selector = Selector::new().unwrap();
        let (mut connection, _) = open(&mut selector, 9, Duration::from_secs(120));
        assert_eq!(selector.len(), 1);
        connection.disconnect(&mut selector);
        assert!(connection.is_closed());
        assert!(selector.is_empty());
    }
}
