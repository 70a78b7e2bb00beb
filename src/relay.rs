// the event loop: one thread, one selector, every socket non-blocking

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::Events;
use tracing::{debug, info};

use crate::capture::PacketCapture;
use crate::client::ClientIdAllocator;
use crate::config::RelayConfig;
use crate::error::Result;
use crate::selector::{Ready, Registrant, Selector};
use crate::tunnel_server::TunnelServer;

const EVENTS_CAPACITY: usize = 1024;

pub struct Relay {
    config: RelayConfig,
}

impl Relay {
    pub fn new(port: u16) -> Self {
        Self::with_config(RelayConfig::with_port(port))
    }

    pub fn with_config(config: RelayConfig) -> Self {
        Relay { config }
    }

    /// Bind the tunnel server, without processing any event yet.
    pub fn start(&self) -> Result<EventLoop> {
        EventLoop::new(self.config.clone())
    }

    /// Run forever, only returns on a fatal error.
    pub fn run(&self) -> Result<()> {
        self.start()?.run()
    }
}

pub struct EventLoop {
    selector: Selector,
    events: Events,
    server: TunnelServer,
    client_ids: ClientIdAllocator,
    cleanup_interval: Duration,
    next_cleaning_deadline: Instant,
}

impl EventLoop {
    fn new(config: RelayConfig) -> Result<Self> {
        let mut selector = Selector::new()?;
        let capture = match &config.capture {
            Some(path) => Some(PacketCapture::create(path)?),
            None => None,
        };
        let cleanup_interval = config.cleanup_interval;
        // nothing can expire before the first idle timeout
        let next_cleaning_deadline = Instant::now() + config.udp_idle_timeout;
        let server = TunnelServer::new(config, &mut selector, capture)?;
        Ok(EventLoop {
            selector,
            events: Events::with_capacity(EVENTS_CAPACITY),
            server,
            client_ids: ClientIdAllocator::new(),
            cleanup_interval,
            next_cleaning_deadline,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.local_addr()?)
    }

    pub fn run(&mut self) -> Result<()> {
        info!("Relay running");
        loop {
            self.poll_once()?;
        }
    }

    /// Wait for events until the next cleaning deadline, then handle them.
    pub fn poll_once(&mut self) -> Result<()> {
        let timeout = self
            .next_cleaning_deadline
            .saturating_duration_since(Instant::now());
        self.selector.select(&mut self.events, Some(timeout))?;

        for event in self.events.iter() {
            let ready = Ready::from(event);
            match self.selector.registrant(event.token()) {
                Some(Registrant::Server) => {
                    self.server.accept(&mut self.selector, &self.client_ids);
                }
                Some(Registrant::Client(id)) => {
                    self.server.on_client_ready(&mut self.selector, id, ready);
                }
                Some(Registrant::Connection(client_id, id)) => {
                    self.server
                        .on_connection_ready(&mut self.selector, client_id, id, ready);
                }
                // closed while handling an earlier event of this batch
                None => {}
            }
        }

        let now = Instant::now();
        if now >= self.next_cleaning_deadline || self.events.is_empty() {
            debug!("Cleaning up expired connections");
            self.server.clean_up(&mut self.selector, now);
            self.next_cleaning_deadline = now + self.cleanup_interval;
        }
        Ok(())
    }
}
