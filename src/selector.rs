// readiness multiplexer: mio poll plus the token -> owner table

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use bitflags::bitflags;
use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Token};

use crate::connection::ConnectionId;

bitflags! {
    pub struct Ready: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const ERROR = 1 << 2;
        const HUP = 1 << 3;
    }
}

impl From<&Event> for Ready {
    fn from(event: &Event) -> Self {
        let mut ready = Ready::empty();
        if event.is_readable() {
            ready |= Ready::READABLE;
        }
        if event.is_writable() {
            ready |= Ready::WRITABLE;
        }
        if event.is_error() {
            ready |= Ready::ERROR;
        }
        if event.is_read_closed() || event.is_write_closed() {
            ready |= Ready::HUP;
        }
        ready
    }
}

/// Who must handle the events of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registrant {
    Server,
    Client(u32),
    Connection(u32, ConnectionId),
}

pub struct Selector {
    poll: Poll,
    registrants: HashMap<Token, Registrant>,
    next_token: usize,
}

impl Selector {
    pub fn new() -> io::Result<Self> {
        Ok(Selector {
            poll: Poll::new()?,
            registrants: HashMap::new(),
            next_token: 0,
        })
    }

    /// Wait for readiness events; an interrupted wait returns without events.
    pub fn select(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(events, timeout) {
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                events.clear();
                Ok(())
            }
            other => other,
        }
    }

    pub fn registrant(&self, token: Token) -> Option<Registrant> {
        self.registrants.get(&token).copied()
    }

    pub fn len(&self) -> usize {
        self.registrants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrants.is_empty()
    }

    // tokens are never reused, so a late event for a cancelled key is simply ignored
    fn allocate(&mut self, registrant: Registrant) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.registrants.insert(token, registrant);
        token
    }

    fn release(&mut self, token: Token) {
        self.registrants.remove(&token);
    }
}

/// Registration of one source, which may temporarily have no interest at all.
///
/// mio is edge-triggered: the interest is re-armed after every event so that
/// a source still ready (e.g. data left unread because the device window was
/// full) is reported again.
pub struct SelectionKey {
    token: Token,
    interest: Option<Interest>,
    cancelled: bool,
}

impl SelectionKey {
    pub fn register<S: Source + ?Sized>(
        selector: &mut Selector,
        source: &mut S,
        interest: Option<Interest>,
        registrant: Registrant,
    ) -> io::Result<Self> {
        let token = selector.allocate(registrant);
        if let Some(interest) = interest {
            if let Err(err) = selector.poll.registry().register(source, token, interest) {
                selector.release(token);
                return Err(err);
            }
        }
        Ok(SelectionKey {
            token,
            interest,
            cancelled: false,
        })
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn interest(&self) -> Option<Interest> {
        self.interest
    }

    pub fn is_valid(&self) -> bool {
        !self.cancelled
    }

    pub fn set_interest<S: Source + ?Sized>(
        &mut self,
        selector: &mut Selector,
        source: &mut S,
        interest: Option<Interest>,
    ) -> io::Result<()> {
        if self.cancelled {
            return Ok(());
        }
        let registry = selector.poll.registry();
        match (self.interest, interest) {
            (None, None) => {}
            (Some(_), None) => registry.deregister(source)?,
            (None, Some(interest)) => registry.register(source, self.token, interest)?,
            (Some(_), Some(interest)) => registry.reregister(source, self.token, interest)?,
        }
        self.interest = interest;
        Ok(())
    }

    pub fn cancel<S: Source + ?Sized>(&mut self, selector: &mut Selector, source: &mut S) {
        if self.cancelled {
            return;
        }
        if self.interest.is_some() {
            // the source is about to be closed anyway
            let _ = selector.poll.registry().deregister(source);
        }
        selector.release(self.token);
        self.interest = None;
        self.cancelled = true;
    }
}

/// Combine optional read/write interests.
pub fn interest_of(readable: bool, writable: bool) -> Option<Interest> {
    match (readable, writable) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::UdpSocket;

    #[test]
    fn test_register_and_cancel() {
        let mut selector = Selector::new().unwrap();
        let mut socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut key = SelectionKey::register(
            &mut selector,
            &mut socket,
            Some(Interest::READABLE),
            Registrant::Server,
        )
        .unwrap();
        assert_eq!(selector.registrant(key.token()), Some(Registrant::Server));

        key.set_interest(&mut selector, &mut socket, None).unwrap();
        assert_eq!(key.interest(), None);
        // still owned while temporarily without interest
        assert_eq!(selector.len(), 1);

        key.set_interest(&mut selector, &mut socket, interest_of(true, true))
            .unwrap();
        key.cancel(&mut selector, &mut socket);
        assert!(!key.is_valid());
        assert!(selector.is_empty());
        assert_eq!(selector.registrant(key.token()), None);
    }

    #[test]
    fn test_tokens_are_not_reused() {
        let mut selector = Selector::new().unwrap();
        let mut socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut first =
            SelectionKey::register(&mut selector, &mut socket, None, Registrant::Client(1)).unwrap();
        first.cancel(&mut selector, &mut socket);
        let second =
            SelectionKey::register(&mut selector, &mut socket, None, Registrant::Client(2)).unwrap();
        assert_ne!(first.token(), second.token());
    }

    #[test]
    fn test_readable_event() {
        let mut selector = Selector::new().unwrap();
        let mut receiver = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let key = SelectionKey::register(
            &mut selector,
            &mut receiver,
            Some(Interest::READABLE),
            Registrant::Client(7),
        )
        .unwrap();
        sender
            .send_to(b"ping", receiver.local_addr().unwrap())
            .unwrap();

        let mut events = Events::with_capacity(8);
        selector
            .select(&mut events, Some(Duration::from_secs(5)))
            .unwrap();
        let event = events.iter().next().expect("no event");
        assert_eq!(event.token(), key.token());
        assert!(Ready::from(event).contains(Ready::READABLE));
    }
}
