// fixed-capacity buffers, allocated once per owner and never grown

pub mod datagram_buffer;
pub mod ipv4_packet_buffer;
pub mod stream_buffer;

pub use datagram_buffer::DatagramBuffer;
pub use ipv4_packet_buffer::Ipv4PacketBuffer;
pub use stream_buffer::StreamBuffer;
