//! # TransportServer
//!
//! Wraps a bound `TcpListener`: accepts connections, wires each into a
//! [`TransportSocket`], and hands it to whoever is waiting via a pending
//! queue so callers outside the accept loop can drain it.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::reactor::NetworkReactor;
use crate::transport_socket::{SocketSink, TransportSocket};
use crate::url::Url;

/// A listening endpoint that produces [`TransportSocket`]s for each accepted
/// connection.
pub struct TransportServer {
    endpoints: Vec<Url>,
    pending: Arc<Mutex<VecDeque<Arc<TransportSocket>>>>,
    notify: Arc<Notify>,
}

impl TransportServer {
    /// Bind `url` and start accepting connections on `reactor`. Each accepted
    /// socket is given `sink` to observe its lifecycle and incoming traffic.
    pub async fn listen(reactor: Arc<NetworkReactor>, url: &Url, sink: Arc<dyn SocketSink>) -> Result<Self> {
        let addr = url.to_socket_addr()?;
        let listener = TcpListener::bind(addr).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::AddrInUse => Error::AddressInUse(url.to_string()),
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(url.to_string()),
            _ => Error::Io(err),
        })?;
        let bound = listener.local_addr().map_err(Error::Io)?;
        let endpoints = url.expand_bound(bound)?;
        info!(endpoints = ?endpoints, "transport server listening");

        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());

        let accept_pending = pending.clone();
        let accept_notify = notify.clone();
        let accept_reactor = reactor.clone();
        reactor.spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let socket = TransportSocket::from_accepted(&accept_reactor, stream, sink.clone()).await;
                        accept_pending.lock().await.push_back(socket);
                        accept_notify.notify_waiters();
                    }
                    Err(err) => {
                        debug!(error = %err, "accept loop terminating");
                        return;
                    }
                }
            }
        });

        Ok(Self {
            endpoints,
            pending,
            notify,
        })
    }

    /// Concrete, externally reachable endpoints for this server. A wildcard
    /// listen host has already been expanded to real interface addresses.
    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    /// Remove and return the oldest accepted socket not yet claimed, waiting
    /// for one to arrive if the queue is currently empty.
    pub async fn next_pending_connection(&self) -> Arc<TransportSocket> {
        loop {
            if let Some(socket) = self.pending.lock().await.pop_front() {
                return socket;
            }
            self.notify.notified().await;
        }
    }
}
