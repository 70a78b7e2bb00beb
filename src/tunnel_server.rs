// accepts device tunnels on the loopback and dispatches their events

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

use mio::net::TcpListener;
use mio::Interest;
use tracing::{error, info};

use crate::capture::PacketCapture;
use crate::client::{Client, ClientIdAllocator};
use crate::config::RelayConfig;
use crate::connection::ConnectionId;
use crate::error::{RelayError, Result};
use crate::selector::{Ready, Registrant, SelectionKey, Selector};

pub struct TunnelServer {
    listener: TcpListener,
    selection_key: SelectionKey,
    clients: HashMap<u32, Client>,
    config: RelayConfig,
    capture: Option<PacketCapture>,
}

impl TunnelServer {
    pub fn new(
        config: RelayConfig,
        selector: &mut Selector,
        capture: Option<PacketCapture>,
    ) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port));
        let mut listener =
            TcpListener::bind(addr).map_err(|source| RelayError::Bind { addr, source })?;
        let selection_key = SelectionKey::register(
            selector,
            &mut listener,
            Some(Interest::READABLE),
            Registrant::Server,
        )?;
        info!("Relay server started on {}", listener.local_addr()?);
        Ok(TunnelServer {
            listener,
            selection_key,
            clients: HashMap::new(),
            config,
            capture,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept every pending device tunnel.
    pub fn accept(&mut self, selector: &mut Selector, client_ids: &ClientIdAllocator) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = client_ids.allocate();
                    match Client::new(id, stream, selector, &self.config, self.capture.clone()) {
                        Ok(client) => {
                            info!("Client #{} connected from {}", id, peer);
                            self.clients.insert(id, client);
                        }
                        Err(err) => error!("Cannot register client #{}: {}", id, err),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    error!("Cannot accept client: {}", err);
                    break;
                }
            }
        }
        if let Err(err) = self.selection_key.set_interest(
            selector,
            &mut self.listener,
            Some(Interest::READABLE),
        ) {
            error!("Cannot re-arm the tunnel server: {}", err);
        }
    }

    pub fn on_client_ready(&mut self, selector: &mut Selector, id: u32, ready: Ready) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.on_ready(selector, ready);
            if client.is_closed() {
                self.clients.remove(&id);
            }
        }
    }

    pub fn on_connection_ready(
        &mut self,
        selector: &mut Selector,
        client_id: u32,
        id: ConnectionId,
        ready: Ready,
    ) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.on_connection_ready(selector, id, ready);
            if client.is_closed() {
                self.clients.remove(&client_id);
            }
        }
    }

    pub fn clean_up(&mut self, selector: &mut Selector, now: Instant) {
        for client in self.clients.values_mut() {
            client.clean_expired_connections(selector, now);
        }
    }
}
