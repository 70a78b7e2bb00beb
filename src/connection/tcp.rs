// tcp flows: a minimal tcp endpoint facing the device, a socket facing the network

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};

use mio::net::TcpStream;
use mio::Interest;
use tracing::{debug, error, info, warn};

use crate::buffer::StreamBuffer;
use crate::client::PacketSource;
use crate::config::CONNECTION_BUFFER_SIZE;
use crate::error::Result;
use crate::packet::{Ipv4Packet, TcpFlags, TcpHeader};
use crate::packetizer::Packetizer;
use crate::selector::{interest_of, Ready, Registrant, SelectionKey, Selector};

use super::{ConnectionId, Context};

/// Largest payload sent to the device in one segment.
pub const MAX_PAYLOAD_SIZE: usize = 0x4000 - 40;

// pure acks beyond this are dropped while the client is not draining
const MAX_QUEUED_CONTROL_PACKETS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    SynSent,
    SynReceived,
    Established,
    CloseWait,
    LastAck,
    Closing,
    FinWait1,
    FinWait2,
    Closed,
}

impl TcpState {
    fn is_connected(self) -> bool {
        matches!(
            self,
            TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2
        )
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynReceived => "SYN_RECEIVED",
            TcpState::Established => "ESTABLISHED",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::LastAck => "LAST_ACK",
            TcpState::Closing => "CLOSING",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

pub struct TcpConnection {
    id: ConnectionId,
    client_id: u32,
    stream: Option<TcpStream>,
    selection_key: Option<SelectionKey>,
    client_to_network: StreamBuffer,
    network_to_client: Packetizer,
    packets_for_client: VecDeque<Ipv4Packet>,

    // None until the SYN is received
    state: Option<TcpState>,
    syn_sequence_number: u32,
    sequence_number: u32,
    acknowledgement_number: u32,
    their_acknowledgement_number: u32,
    client_window: u16,
    fin_sequence_number: Option<u32>,
    fin_received: bool,
    network_eof: bool,
    closed: bool,
}

impl TcpConnection {
    pub fn new(id: ConnectionId, client_id: u32, reference: &Ipv4Packet) -> Result<Self> {
        Ok(TcpConnection {
            id,
            client_id,
            stream: None,
            selection_key: None,
            client_to_network: StreamBuffer::new(CONNECTION_BUFFER_SIZE),
            network_to_client: Packetizer::new(reference)?,
            packets_for_client: VecDeque::new(),
            state: None,
            syn_sequence_number: 0,
            sequence_number: 0,
            acknowledgement_number: 0,
            their_acknowledgement_number: 0,
            client_window: 0,
            fin_sequence_number: None,
            fin_received: false,
            network_eof: false,
            closed: false,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> Option<TcpState> {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn acknowledgement_number(&self) -> u32 {
        self.acknowledgement_number
    }

    pub fn send_to_network(&mut self, cx: &mut Context<'_>, packet: &Ipv4Packet) {
        if self.closed {
            return;
        }
        self.handle_packet(cx, packet);
        if !self.closed {
            self.update_interests(cx.selector);
        }
    }

    pub fn on_ready(&mut self, cx: &mut Context<'_>, ready: Ready) {
        if self.closed {
            return;
        }
        if self.state == Some(TcpState::SynSent) {
            if ready.intersects(Ready::WRITABLE | Ready::ERROR | Ready::HUP) {
                self.process_connect(cx);
            }
        } else {
            if ready.contains(Ready::WRITABLE) {
                self.process_send(cx);
            }
            if !self.closed
                && ready.intersects(Ready::READABLE | Ready::HUP | Ready::ERROR)
                && self.may_read()
            {
                self.process_receive(cx);
            }
        }
        if !self.closed {
            self.update_interests(cx.selector);
        }
    }

    pub fn disconnect(&mut self, selector: &mut Selector) {
        if let Some(mut stream) = self.stream.take() {
            if let Some(key) = self.selection_key.as_mut() {
                key.cancel(selector, &mut stream);
            }
        }
        self.selection_key = None;
        self.state = Some(TcpState::Closed);
        self.closed = true;
        info!("Client #{}: {} Close", self.client_id, self.id);
    }

    fn handle_packet(&mut self, cx: &mut Context<'_>, packet: &Ipv4Packet) {
        let tcp = match packet.tcp_header() {
            Some(tcp) => tcp,
            None => {
                warn!("Client #{}: {} not a TCP packet", self.client_id, self.id);
                return;
            }
        };
        let state = match self.state {
            None => {
                self.handle_first_packet(cx, &tcp);
                return;
            }
            Some(state) => state,
        };

        if tcp.is_syn() {
            self.handle_duplicate_syn(cx, &tcp, state);
            return;
        }

        let expected = self
            .acknowledgement_number
            .wrapping_add(self.client_to_network.size() as u32);
        if tcp.sequence_number() != expected {
            // ignore, the device will retransmit
            warn!(
                "Client #{}: {} ignoring packet {} (expecting {}) [{}]",
                self.client_id,
                self.id,
                tcp.sequence_number(),
                expected,
                state
            );
            return;
        }

        self.client_window = tcp.window();
        self.their_acknowledgement_number = tcp.acknowledgement_number();

        if tcp.is_rst() {
            debug!("Client #{}: {} reset by the device", self.client_id, self.id);
            self.close(cx);
            return;
        }
        if tcp.is_ack() && !self.handle_ack(cx, packet) {
            // the FIN of a dropped segment comes back with its retransmission
            return;
        }
        if tcp.is_fin() {
            self.handle_fin(cx);
        }
        if self.closed {
            return;
        }
        if let Some(fin_sequence_number) = self.fin_sequence_number {
            if tcp.acknowledgement_number() == fin_sequence_number.wrapping_add(1) {
                self.handle_fin_ack(cx);
            }
        }
    }

    fn handle_first_packet(&mut self, cx: &mut Context<'_>, tcp: &TcpHeader<'_>) {
        if !tcp.is_syn() {
            // no socket was ever opened, nothing to reset
            warn!(
                "Client #{}: {} unexpected first packet {}, dropping connection",
                self.client_id,
                self.id,
                tcp.sequence_number()
            );
            self.close(cx);
            return;
        }

        let their_sequence_number = tcp.sequence_number();
        self.syn_sequence_number = their_sequence_number;
        self.acknowledgement_number = their_sequence_number.wrapping_add(1);
        self.sequence_number = rand::random::<u32>();
        self.their_acknowledgement_number = self.sequence_number;
        self.client_window = tcp.window();
        self.state = Some(TcpState::SynSent);
        debug!(
            "Client #{}: {} initialized seq={} ack={}",
            self.client_id, self.id, self.sequence_number, self.acknowledgement_number
        );

        if let Err(err) = self.connect(cx.selector) {
            error!("Client #{}: {} cannot connect: {}", self.client_id, self.id, err);
            self.reset_connection(cx);
        }
    }

    fn connect(&mut self, selector: &mut Selector) -> io::Result<()> {
        let mut stream = TcpStream::connect(self.id.rewritten_destination())?;
        let key = SelectionKey::register(
            selector,
            &mut stream,
            Some(Interest::WRITABLE),
            Registrant::Connection(self.client_id, self.id),
        )?;
        self.stream = Some(stream);
        self.selection_key = Some(key);
        Ok(())
    }

    fn handle_duplicate_syn(&mut self, cx: &mut Context<'_>, tcp: &TcpHeader<'_>, state: TcpState) {
        let their_sequence_number = tcp.sequence_number();
        if state == TcpState::SynSent {
            // the device retransmitted its SYN before the network answered
            self.syn_sequence_number = their_sequence_number;
            self.acknowledgement_number = their_sequence_number.wrapping_add(1);
        } else if their_sequence_number != self.syn_sequence_number {
            warn!(
                "Client #{}: {} unexpected SYN in state {}, resetting",
                self.client_id, self.id, state
            );
            self.reset_connection(cx);
        }
    }

    /// Buffer the segment payload; false if it was dropped for lack of room.
    fn handle_ack(&mut self, cx: &mut Context<'_>, packet: &Ipv4Packet) -> bool {
        let payload = packet.payload();
        if payload.is_empty() {
            return true;
        }
        if self.client_to_network.remaining() < payload.len() {
            warn!(
                "Client #{}: {} not enough space, dropping packet",
                self.client_id, self.id
            );
            return false;
        }
        self.client_to_network.read_from(payload);
        if self.client_to_network.is_full() && self.state == Some(TcpState::Established) {
            // advertise the closed window now, the device would wait for the next event
            self.send_empty_packet_to_client(cx, TcpFlags::ACK);
        }
        true
    }

    fn handle_fin(&mut self, cx: &mut Context<'_>) {
        self.fin_received = true;
        if self.client_to_network.is_empty() {
            self.do_handle_fin(cx);
        }
    }

    // the device FIN is processed once all its data has reached the network
    fn do_handle_fin(&mut self, cx: &mut Context<'_>) {
        self.acknowledgement_number = self.acknowledgement_number.wrapping_add(1);
        match self.state {
            Some(TcpState::Established) => {
                self.send_empty_packet_to_client(cx, TcpFlags::FIN | TcpFlags::ACK);
                self.fin_sequence_number = Some(self.sequence_number);
                self.sequence_number = self.sequence_number.wrapping_add(1);
                self.state = Some(TcpState::LastAck);
            }
            Some(TcpState::FinWait1) => {
                self.send_empty_packet_to_client(cx, TcpFlags::ACK);
                self.state = Some(TcpState::FinWait2);
            }
            Some(TcpState::FinWait2) => {
                self.send_empty_packet_to_client(cx, TcpFlags::ACK);
                self.close(cx);
            }
            Some(TcpState::CloseWait) => {
                self.state = Some(TcpState::LastAck);
            }
            Some(TcpState::LastAck) => {
                self.close(cx);
            }
            other => {
                warn!(
                    "Client #{}: {} received FIN in state {:?}",
                    self.client_id, self.id, other
                );
            }
        }
    }

    fn handle_fin_ack(&mut self, cx: &mut Context<'_>) {
        match self.state {
            Some(TcpState::LastAck) => self.close(cx),
            Some(TcpState::FinWait1) => self.state = Some(TcpState::FinWait2),
            Some(TcpState::FinWait2) if self.fin_received => self.close(cx),
            _ => {}
        }
    }

    fn process_connect(&mut self, cx: &mut Context<'_>) {
        let stream = match self.stream.as_ref() {
            Some(stream) => stream,
            None => return,
        };
        let connected = match stream.take_error() {
            Ok(Some(err)) | Err(err) => Err(err),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => Ok(true),
                Err(ref e)
                    if e.kind() == io::ErrorKind::NotConnected
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    Ok(false)
                }
                Err(err) => Err(err),
            },
        };
        match connected {
            Ok(true) => {
                debug!("Client #{}: {} connected", self.client_id, self.id);
                self.state = Some(TcpState::Established);
                self.send_empty_packet_to_client(cx, TcpFlags::SYN | TcpFlags::ACK);
                self.sequence_number = self.sequence_number.wrapping_add(1);
            }
            Ok(false) => {}
            Err(err) => {
                error!("Client #{}: {} cannot connect: {}", self.client_id, self.id, err);
                self.reset_connection(cx);
            }
        }
    }

    fn process_send(&mut self, cx: &mut Context<'_>) {
        if self.client_to_network.is_empty() {
            return;
        }
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return,
        };
        match self.client_to_network.write_to(stream) {
            Ok(0) => {
                debug!("Client #{}: {} network closed for writing", self.client_id, self.id);
                self.close(cx);
            }
            Ok(w) => {
                self.acknowledgement_number = self.acknowledgement_number.wrapping_add(w as u32);
                if self.fin_received && self.client_to_network.is_empty() {
                    self.do_handle_fin(cx);
                } else {
                    // the window moved
                    self.send_empty_packet_to_client(cx, TcpFlags::ACK);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                error!("Client #{}: {} cannot write: {}", self.client_id, self.id, err);
                self.reset_connection(cx);
            }
        }
    }

    fn process_receive(&mut self, cx: &mut Context<'_>) {
        let max_payload_length = self.remaining_client_window().min(MAX_PAYLOAD_SIZE);
        if max_payload_length == 0 {
            return;
        }
        self.update_headers(TcpFlags::ACK | TcpFlags::PSH);
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return,
        };
        let buffer = self.network_to_client.payload_buffer(max_payload_length);
        match stream.read(buffer) {
            Ok(0) => self.eof(cx),
            Ok(r) => {
                let packet = self.network_to_client.inflate(r);
                self.sequence_number = self.sequence_number.wrapping_add(r as u32);
                self.packets_for_client.push_back(packet);
                cx.sink.consume(self, cx.selector);
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                error!("Client #{}: {} cannot read: {}", self.client_id, self.id, err);
                self.reset_connection(cx);
            }
        }
    }

    fn eof(&mut self, cx: &mut Context<'_>) {
        debug!("Client #{}: {} network EOF", self.client_id, self.id);
        self.network_eof = true;
        self.send_empty_packet_to_client(cx, TcpFlags::FIN | TcpFlags::ACK);
        self.fin_sequence_number = Some(self.sequence_number);
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.state = Some(if self.state == Some(TcpState::CloseWait) {
            TcpState::LastAck
        } else {
            TcpState::FinWait1
        });
    }

    /// Bytes the device can still accept.
    pub fn remaining_client_window(&self) -> usize {
        let window = u32::from(self.client_window);
        let remaining = self
            .their_acknowledgement_number
            .wrapping_add(window)
            .wrapping_sub(self.sequence_number) as i32;
        if remaining < 0 || remaining as u32 > window {
            // our sequence number is outside the device window
            return 0;
        }
        remaining as usize
    }

    fn may_read(&self) -> bool {
        self.state.map_or(false, TcpState::is_connected)
            && !self.network_eof
            && self.packets_for_client.is_empty()
            && self.remaining_client_window() > 0
    }

    fn may_write(&self) -> bool {
        !self.client_to_network.is_empty()
    }

    fn interest(&self) -> Option<Interest> {
        match self.state {
            Some(TcpState::SynSent) => Some(Interest::WRITABLE),
            Some(state) if state.is_connected() => interest_of(self.may_read(), self.may_write()),
            _ => None,
        }
    }

    fn update_interests(&mut self, selector: &mut Selector) {
        let interest = self.interest();
        if let (Some(stream), Some(key)) = (self.stream.as_mut(), self.selection_key.as_mut()) {
            if let Err(err) = key.set_interest(selector, stream, interest) {
                error!(
                    "Client #{}: {} cannot update interests: {}",
                    self.client_id, self.id, err
                );
            }
        }
    }

    fn update_headers(&mut self, flags: TcpFlags) {
        let window = self.client_to_network.remaining().min(0xffff) as u16;
        let sequence_number = self.sequence_number;
        let acknowledgement_number = self.acknowledgement_number;
        if let Some(mut tcp) = self.network_to_client.response_tcp_header_mut() {
            tcp.set_sequence_number(sequence_number);
            tcp.set_acknowledgement_number(acknowledgement_number);
            tcp.set_flags(flags);
            tcp.set_window(window);
        }
    }

    fn create_empty_response_packet(&mut self, flags: TcpFlags) -> Ipv4Packet {
        self.update_headers(flags);
        self.network_to_client.packetize_empty_payload()
    }

    // control segments queue behind pending data so that a FIN never overtakes it
    fn send_empty_packet_to_client(&mut self, cx: &mut Context<'_>, flags: TcpFlags) {
        let packet = self.create_empty_response_packet(flags);
        if flags == TcpFlags::ACK && self.packets_for_client.len() >= MAX_QUEUED_CONTROL_PACKETS {
            debug!("Client #{}: {} dropping ACK", self.client_id, self.id);
            return;
        }
        self.packets_for_client.push_back(packet);
        cx.sink.consume(self, cx.selector);
    }

    fn reset_connection(&mut self, cx: &mut Context<'_>) {
        debug!("Client #{}: {} reset", self.client_id, self.id);
        let packet = self.create_empty_response_packet(TcpFlags::RST | TcpFlags::ACK);
        self.packets_for_client.push_back(packet);
        self.close(cx);
    }

    fn close(&mut self, cx: &mut Context<'_>) {
        // last chance for queued segments, unless other sources are waiting ahead
        if !self.packets_for_client.is_empty() && !cx.sink.is_first_in_line(&self.id) {
            warn!(
                "Client #{}: {} closing behind waiting connections, dropping {} packets",
                self.client_id,
                self.id,
                self.packets_for_client.len()
            );
            self.packets_for_client.clear();
        }
        while let Some(packet) = self.packets_for_client.pop_front() {
            if !cx.sink.send_to_client(&packet) {
                warn!(
                    "Client #{}: {} closing with undelivered packets",
                    self.client_id, self.id
                );
                break;
            }
        }
        self.packets_for_client.clear();
        self.disconnect(cx.selector);
    }
}

impl PacketSource for TcpConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn get(&self) -> Option<&Ipv4Packet> {
        self.packets_for_client.front()
    }

    fn next(&mut self, selector: &mut Selector) {
        self.packets_for_client.pop_front();
        if !self.closed {
            self.update_interests(selector);
        }
    }
}
