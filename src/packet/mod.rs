// binary layer: ipv4, tcp and udp headers parsed and mutated in place

pub mod checksum;
pub mod ipv4_header;
pub mod ipv4_packet;
pub mod tcp_header;
pub mod transport_header;
pub mod udp_header;

pub use ipv4_header::{Ipv4Header, Ipv4HeaderMut, Protocol};
pub use ipv4_packet::{Ipv4Packet, MAX_PACKET_LENGTH};
pub use tcp_header::{TcpFlags, TcpHeader, TcpHeaderMut};
pub use transport_header::{TransportHeader, TransportHeaderMut};
pub use udp_header::{UdpHeader, UdpHeaderMut};
