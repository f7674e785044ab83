//! # Session
//!
//! The client-facing orchestrator: one link to a directory, a pool of
//! per-endpoint sockets shared across concurrent callers, a table of
//! services this process itself hosts, and the signals that let callers
//! observe connection lifecycle without polling.

use std::collections::HashMap;
use std::process;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::buffer::Buffer;
use crate::codec::{Reader, Writer};
use crate::error::{Error, Result};
use crate::message::{Message, MessageType, SERVICE_DIRECTORY};
use crate::reactor::NetworkReactor;
use crate::service_directory::{ServiceInfo, FN_REGISTER_SERVICE, FN_SERVICE, PATH_MAIN};
use crate::transport_server::TransportServer;
use crate::transport_socket::{SocketSink, TransportSocket};
use crate::url::Url;

/// A locally-hosted service implementation. `invoke` receives the raw
/// argument bytes for `function` and returns the raw reply bytes; signature
/// walking for arbitrary aggregate types is left to a higher layer, so both
/// sides here deal only in primitive-codec payloads.
#[async_trait]
pub trait ServiceObject: Send + Sync {
    async fn invoke(&self, function: u32, args: &[u8]) -> Result<Buffer>;
}

/// Signals a `Session` emits on its reactor thread. Subscribers must not
/// block inside their receive loop.
#[derive(Debug, Clone)]
pub enum Signal {
    Connected,
    Disconnected,
    ServiceRegistered { id: u32, name: String },
    ServiceUnregistered { id: u32, name: String },
}

/// A bound handle through which a caller invokes methods on a remote
/// service resolved via `Session::service`.
pub struct ServiceProxy {
    socket: Arc<TransportSocket>,
    service_id: u32,
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("service_id", &self.service_id)
            .finish()
    }
}

impl ServiceProxy {
    pub async fn call(&self, function: u32, args: Buffer) -> Result<Message> {
        self.socket.call(self.service_id, PATH_MAIN, function, args).await
    }

    /// Emit a one-way event for `function`; there is no reply to await and
    /// no correlation slot is consumed.
    pub async fn emit(&self, function: u32, args: Buffer) -> Result<()> {
        let msg = Message::event(self.service_id, PATH_MAIN, function, args);
        if !self.socket.send(&msg).await? {
            return Err(Error::Disconnected);
        }
        Ok(())
    }

    pub fn service_id(&self) -> u32 {
        self.service_id
    }

    /// Identity of the underlying pooled socket, for tests asserting that
    /// concurrent resolutions of the same endpoint share one connection.
    pub fn socket_id(&self) -> usize {
        Arc::as_ptr(&self.socket) as usize
    }
}

struct Inner {
    reactor: Arc<NetworkReactor>,
    directory_link: Mutex<Option<Arc<TransportSocket>>>,
    endpoint_pool: Mutex<HashMap<Url, Arc<TransportSocket>>>,
    local_services: Mutex<HashMap<u32, Arc<dyn ServiceObject>>>,
    local_server: Mutex<Option<TransportServer>>,
    signals: broadcast::Sender<Signal>,
    machine_id: String,
}

/// Binds a directory link to a pool of per-endpoint sockets and a table of
/// locally hosted services.
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(reactor: Arc<NetworkReactor>) -> Self {
        let (signals, _rx) = broadcast::channel(64);
        let machine_id = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        Self {
            inner: Arc::new(Inner {
                reactor,
                directory_link: Mutex::new(None),
                endpoint_pool: Mutex::new(HashMap::new()),
                local_services: Mutex::new(HashMap::new()),
                local_server: Mutex::new(None),
                signals,
                machine_id,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.inner.signals.subscribe()
    }

    /// Connect to a service directory at `url` and store the link.
    pub async fn connect(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url)?;
        let sink = Arc::new(SessionSink {
            inner: self.inner.clone(),
        });
        let socket = TransportSocket::connect(&self.inner.reactor, &parsed).await?;
        socket.set_sink(sink).await;
        *self.inner.directory_link.lock().await = Some(socket);
        let _ = self.inner.signals.send(Signal::Connected);
        Ok(())
    }

    /// Start listening for incoming connections on `url`, required before
    /// `register_service`.
    pub async fn listen(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url)?;
        let sink = Arc::new(SessionSink {
            inner: self.inner.clone(),
        });
        let server = TransportServer::listen(self.inner.reactor.clone(), &parsed, sink).await?;
        *self.inner.local_server.lock().await = Some(server);
        Ok(())
    }

    /// Register `object` under `name` with the connected directory. Requires
    /// a prior `listen()` call so the directory has somewhere to route Calls.
    pub async fn register_service(&self, name: &str, object: Arc<dyn ServiceObject>) -> Result<u32> {
        let endpoints = {
            let guard = self.inner.local_server.lock().await;
            let server = guard
                .as_ref()
                .ok_or_else(|| Error::NotFound("listen() must be called before register_service".into()))?;
            server.endpoints().to_vec()
        };

        let info = ServiceInfo {
            name: name.to_string(),
            machine_id: self.inner.machine_id.clone(),
            process_id: process::id(),
            endpoints,
            service_id: 0,
        };

        let directory = self.directory_link().await?;
        let reply = directory
            .call(SERVICE_DIRECTORY, PATH_MAIN, FN_REGISTER_SERVICE, info.encode())
            .await?;
        let id = Reader::new(reply.body.as_slice()).read_u32()?;

        self.inner.local_services.lock().await.insert(id, object);
        info!(service_id = id, name, "registered service with directory");
        let _ = self.inner.signals.send(Signal::ServiceRegistered {
            id,
            name: name.to_string(),
        });
        Ok(id)
    }

    /// Resolve `name` via the directory and return a proxy bound to a
    /// (possibly reused) socket to one of its endpoints.
    pub async fn service(&self, name: &str) -> Result<ServiceProxy> {
        let directory = self.directory_link().await?;
        let mut lookup = Buffer::new();
        Writer::new(&mut lookup).write_string(name);
        let reply = directory.call(SERVICE_DIRECTORY, PATH_MAIN, FN_SERVICE, lookup).await?;
        let info = ServiceInfo::decode(reply.body.as_slice())?;

        let endpoint = info
            .endpoints
            .first()
            .ok_or_else(|| Error::NotFound(format!("{name} has no endpoints")))?
            .clone();

        let socket = self.endpoint_socket(endpoint).await?;
        Ok(ServiceProxy {
            socket,
            service_id: info.service_id,
        })
    }

    /// Lookup-or-insert a pooled socket to `endpoint` in one critical
    /// section, so concurrent callers resolving the same endpoint share one
    /// in-flight connection attempt instead of racing to open several.
    async fn endpoint_socket(&self, endpoint: Url) -> Result<Arc<TransportSocket>> {
        let mut pool = self.inner.endpoint_pool.lock().await;
        if let Some(existing) = pool.get(&endpoint) {
            if existing.is_connected().await {
                return Ok(existing.clone());
            }
        }
        let socket = TransportSocket::connect(&self.inner.reactor, &endpoint).await?;
        let sink = Arc::new(SessionSink {
            inner: self.inner.clone(),
        });
        socket.set_sink(sink).await;
        pool.insert(endpoint, socket.clone());
        Ok(socket)
    }

    async fn directory_link(&self) -> Result<Arc<TransportSocket>> {
        self.inner
            .directory_link
            .lock()
            .await
            .clone()
            .ok_or(Error::Disconnected)
    }

    /// Tear down the directory link and every pooled endpoint socket. Any
    /// in-flight call future on those sockets fails with `Disconnected`.
    pub async fn close(&self) {
        if let Some(link) = self.inner.directory_link.lock().await.take() {
            link.disconnect().await;
        }
        let mut pool = self.inner.endpoint_pool.lock().await;
        for (_, socket) in pool.drain() {
            socket.disconnect().await;
        }
        let _ = self.inner.signals.send(Signal::Disconnected);
    }
}

/// Dispatches incoming Calls on any socket the session owns (directory link
/// or pooled endpoint) to the matching locally-hosted `ServiceObject`.
struct SessionSink {
    inner: Arc<Inner>,
}

#[async_trait]
impl SocketSink for SessionSink {
    async fn on_connected(&self) {
        let _ = self.inner.signals.send(Signal::Connected);
    }

    async fn on_disconnected(&self) {
        let _ = self.inner.signals.send(Signal::Disconnected);
    }

    async fn on_ready_read(&self, socket: &Arc<TransportSocket>, msg: Message) {
        if msg.header.kind != MessageType::Call {
            return;
        }
        let services = self.inner.local_services.lock().await;
        let Some(object) = services.get(&msg.header.service).cloned() else {
            warn!(service = msg.header.service, "call for unknown local service");
            return;
        };
        drop(services);

        let reply = match object.invoke(msg.header.function, msg.body.as_slice()).await {
            Ok(body) => Message::reply(msg.header.id, msg.header.service, msg.header.path, msg.header.function, body),
            Err(err) => {
                let (code, text) = err.wire_encode();
                let mut body = Buffer::new();
                let mut w = Writer::new(&mut body);
                w.write_u32(code);
                w.write_string(&text);
                Message::error(msg.header.id, msg.header.service, msg.header.path, msg.header.function, body)
            }
        };
        let _ = socket.send(&reply).await;
    }
}
