// per-client map of device flows to their connections

use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{error, trace, warn};

use crate::binary;
use crate::client::{ClientSink, PacketSource, PacketSources};
use crate::connection::{Connection, ConnectionId, Context};
use crate::packet::Ipv4Packet;
use crate::selector::{Ready, Selector};

/// Connections are looked up for every packet; the least recently used
/// order is only informative, nothing is ever evicted implicitly.
pub struct Router {
    client_id: u32,
    connections: LruCache<ConnectionId, Connection>,
    udp_idle_timeout: Duration,
}

impl Router {
    pub fn new(client_id: u32, udp_idle_timeout: Duration) -> Self {
        Router {
            client_id,
            connections: LruCache::unbounded(),
            udp_idle_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains(id)
    }

    pub fn get(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Forward a packet from the device, opening its connection if needed.
    pub fn send_to_network(
        &mut self,
        selector: &mut Selector,
        sink: &mut ClientSink,
        packet: Ipv4Packet,
    ) {
        if !packet.is_valid() {
            warn!("Client #{}: dropping invalid packet", self.client_id);
            trace!("{}", binary::build_packet_string(packet.raw()));
            return;
        }
        let id = match ConnectionId::from_packet(&packet) {
            Some(id) => id,
            None => return,
        };
        if !self.connections.contains(&id) {
            match Connection::create(id, self.client_id, &packet, selector, self.udp_idle_timeout)
            {
                Ok(connection) => {
                    self.connections.put(id, connection);
                }
                Err(err) => {
                    error!(
                        "Client #{}: cannot create connection {}, dropping packet: {}",
                        self.client_id, id, err
                    );
                    return;
                }
            }
        }
        if let Some(connection) = self.connections.get_mut(&id) {
            let mut cx = Context { selector, sink };
            connection.send_to_network(&mut cx, &packet);
            if connection.is_closed() {
                self.remove(&id);
            }
        }
    }

    pub fn on_ready(
        &mut self,
        selector: &mut Selector,
        sink: &mut ClientSink,
        id: ConnectionId,
        ready: Ready,
    ) {
        // the connection may have been removed earlier in the same poll
        if let Some(connection) = self.connections.peek_mut(&id) {
            let mut cx = Context { selector, sink };
            connection.on_ready(&mut cx, ready);
            if connection.is_closed() {
                self.remove(&id);
            }
        }
    }

    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        let connection = self.connections.pop(id);
        if connection.is_none() {
            warn!(
                "Client #{}: removing unknown connection {}",
                self.client_id, id
            );
        }
        connection
    }

    /// Drop the connections idle for too long; only udp connections expire.
    pub fn clean_expired_connections(&mut self, selector: &mut Selector, now: Instant) {
        let expired: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, connection)| connection.is_expired(now))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(mut connection) = self.remove(&id) {
                connection.disconnect(selector);
            }
        }
    }

    pub fn clear(&mut self, selector: &mut Selector) {
        for (_, connection) in self.connections.iter_mut() {
            if !connection.is_closed() {
                connection.disconnect(selector);
            }
        }
        self.connections.clear();
    }
}

impl PacketSources for Router {
    fn find(&mut self, id: ConnectionId) -> Option<&mut dyn PacketSource> {
        self.connections
            .peek_mut(&id)
            .map(|connection| connection.as_packet_source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Protocol;
    use etherparse::PacketBuilder;
    use std::net::Ipv4Addr;

    fn datagram(source_port: u16, destination_port: u16) -> Ipv4Packet {
        let mut raw = Vec::new();
        PacketBuilder::ipv4([10, 0, 2, 15], [127, 0, 0, 1], 64)
            .udp(source_port, destination_port)
            .write(&mut raw, b"data")
            .unwrap();
        Ipv4Packet::parse(raw).unwrap()
    }

    fn id(source_port: u16, destination_port: u16) -> ConnectionId {
        ConnectionId::new(
            Protocol::Udp,
            (Ipv4Addr::new(10, 0, 2, 15), source_port),
            (Ipv4Addr::new(127, 0, 0, 1), destination_port),
        )
    }

    #[test]
    fn test_connection_per_flow() {
        let mut selector = Selector::new().unwrap();
        let mut sink = ClientSink::new(1, 1 << 20, None);
        let mut router = Router::new(1, Duration::from_secs(120));
        assert!(router.is_empty());

        router.send_to_network(&mut selector, &mut sink, datagram(1000, 9));
        router.send_to_network(&mut selector, &mut sink, datagram(1000, 9));
        router.send_to_network(&mut selector, &mut sink, datagram(1001, 9));
        assert_eq!(router.len(), 2);
        assert!(router.contains(&id(1000, 9)));
        assert!(router.contains(&id(1001, 9)));
        assert!(!router.contains(&id(1002, 9)));
    }

    #[test]
    fn test_invalid_packet_dropped() {
        let mut selector = Selector::new().unwrap();
        let mut sink = ClientSink::new(1, 1 << 20, None);
        let mut router = Router::new(1, Duration::from_secs(120));
        let mut raw = datagram(1000, 9).raw().to_vec();
        // ICMP
        raw[9] = 1;
        let packet = Ipv4Packet::parse(raw).unwrap();
        router.send_to_network(&mut selector, &mut sink, packet);
        assert!(router.is_empty());
        assert!(selector.is_empty());
    }

    #[test]
    fn test_clean_expired_connections() {
        let mut selector = Selector::new().unwrap();
        let mut sink = ClientSink::new(1, 1 << 20, None);
        let mut router = Router::new(1, Duration::from_secs(120));
        router.send_to_network(&mut selector, &mut sink, datagram(1000, 9));
        router.send_to_network(&mut selector, &mut sink, datagram(1001, 9));

        router.clean_expired_connections(&mut selector, Instant::now());
        assert_eq!(router.len(), 2);

        router.clean_expired_connections(&mut selector, Instant::now() + Duration::from_secs(121));
        assert!(router.is_empty());
        assert!(selector.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut selector = Selector::new().unwrap();
        let mut sink = ClientSink::new(1, 1 << 20, None);
        let mut router = Router::new(1, Duration::from_secs(120));
        router.send_to_network(&mut selector, &mut sink, datagram(1000, 9));

        let mut connection = router.remove(&id(1000, 9)).unwrap();
        connection.disconnect(&mut selector);
        assert!(router.remove(&id(1000, 9)).is_none());
        assert!(router.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut selector = Selector::new().unwrap();
        let mut sink = ClientSink::new(1, 1 << 20, None);
        let mut router = Router::new(1, Duration::from_secs(120));
        router.send_to_network(&mut selector, &mut sink, datagram(1000, 9));
        router.send_to_network(&mut selector, &mut sink, datagram(1001, 9));
        assert_eq!(selector.len(), 2);

        router.clear(&mut selector);
        assert!(router.is_empty());
        assert!(selector.is_empty());
    }

    #[test]
    fn test_tcp_without_syn_is_not_kept() {
        let mut selector = Selector::new().unwrap();
        let mut sink = ClientSink::new(1, 1 << 20, None);
        let mut router = Router::new(1, Duration::from_secs(120));
        let mut raw = Vec::new();
        PacketBuilder::ipv4([10, 0, 2, 15], [127, 0, 0, 1], 64)
            .tcp(1000, 9, 1, 1024)
            .ack(1)
            .write(&mut raw, &[])
            .unwrap();
        router.send_to_network(&mut selector, &mut sink, Ipv4Packet::parse(raw).unwrap());
        assert!(router.is_empty());
        assert!(sink.is_empty());
    }
}
