//! # ServiceDirectory
//!
//! In-memory registry of published services, itself reachable as service id
//! 1 over the same transport it catalogs. A directory instance owns no
//! upstream dependency: it is the root of a mesh.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::buffer::Buffer;
use crate::codec::{Reader, Writer};
use crate::error::{Error, Result};
use crate::message::{Message, MessageType, SERVICE_DIRECTORY};
use crate::reactor::NetworkReactor;
use crate::transport_server::TransportServer;
use crate::transport_socket::SocketSink;
use crate::url::Url;

pub const PATH_MAIN: u32 = 1;
pub const FN_REGISTER_SERVICE: u32 = 100;
pub const FN_UNREGISTER_SERVICE: u32 = 101;
pub const FN_SERVICE_LIST: u32 = 102;
pub const FN_SERVICE: u32 = 103;

/// Metadata the directory stores for one published service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub name: String,
    pub machine_id: String,
    pub process_id: u32,
    pub endpoints: Vec<Url>,
    pub service_id: u32,
}

impl ServiceInfo {
    pub fn encode(&self) -> Buffer {
        let mut buf = Buffer::new();
        let mut w = Writer::new(&mut buf);
        w.write_string(&self.name);
        w.write_string(&self.machine_id);
        w.write_u32(self.process_id);
        w.write_seq(&self.endpoints, |w, url| w.write_string(&url.to_string()));
        w.write_u32(self.service_id);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let name = r.read_string()?;
        let machine_id = r.read_string()?;
        let process_id = r.read_u32()?;
        let endpoints = r.read_seq(|r| {
            let raw = r.read_string()?;
            Url::parse(&raw)
        })?;
        let service_id = r.read_u32()?;
        Ok(Self {
            name,
            machine_id,
            process_id,
            endpoints,
            service_id,
        })
    }
}

fn encode_list(infos: &[ServiceInfo]) -> Buffer {
    let mut buf = Buffer::new();
    Writer::new(&mut buf).write_seq(infos, |w, info| {
        w.write_string(&info.name);
        w.write_string(&info.machine_id);
        w.write_u32(info.process_id);
        w.write_seq(&info.endpoints, |w, url| w.write_string(&url.to_string()));
        w.write_u32(info.service_id);
    });
    buf
}

struct State {
    next_id: u32,
    by_id: HashMap<u32, ServiceInfo>,
    by_name: HashMap<String, u32>,
}

impl State {
    fn new() -> Self {
        Self {
            next_id: 2,
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        }
    }
}

/// The registry and the `TransportServer` that exposes it over the wire.
pub struct ServiceDirectory {
    state: Arc<Mutex<State>>,
    server: TransportServer,
}

impl ServiceDirectory {
    pub async fn listen(reactor: Arc<NetworkReactor>, url: &Url) -> Result<Self> {
        let state = Arc::new(Mutex::new(State::new()));
        let sink = Arc::new(DirectorySink { state: state.clone() });
        let server = TransportServer::listen(reactor, url, sink).await?;
        Ok(Self { state, server })
    }

    pub fn endpoints(&self) -> &[Url] {
        self.server.endpoints()
    }

    /// Snapshot of currently registered services, for diagnostics and tests.
    pub async fn service_list(&self) -> Vec<ServiceInfo> {
        self.state.lock().await.by_id.values().cloned().collect()
    }
}

struct DirectorySink {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl SocketSink for DirectorySink {
    async fn on_ready_read(&self, socket: &Arc<crate::transport_socket::TransportSocket>, msg: Message) {
        if msg.header.kind != MessageType::Call {
            return;
        }
        let reply = self.dispatch(&msg).await;
        let _ = socket.send(&reply).await;
    }
}

impl DirectorySink {
    async fn dispatch(&self, msg: &Message) -> Message {
        let result = match msg.header.function {
            FN_REGISTER_SERVICE => self.register(msg).await,
            FN_UNREGISTER_SERVICE => self.unregister(msg).await,
            FN_SERVICE_LIST => self.list().await,
            FN_SERVICE => self.lookup(msg).await,
            other => Err(Error::NotFound(format!("function {other}"))),
        };
        match result {
            Ok(body) => Message::reply(msg.header.id, SERVICE_DIRECTORY, PATH_MAIN, msg.header.function, body),
            Err(err) => {
                let (code, text) = err.wire_encode();
                let mut body = Buffer::new();
                let mut w = Writer::new(&mut body);
                w.write_u32(code);
                w.write_string(&text);
                Message::error(msg.header.id, SERVICE_DIRECTORY, PATH_MAIN, msg.header.function, body)
            }
        }
    }

    async fn register(&self, msg: &Message) -> Result<Buffer> {
        let mut info = ServiceInfo::decode(msg.body.as_slice())?;
        let mut state = self.state.lock().await;
        if state.by_name.contains_key(&info.name) {
            return Err(Error::AlreadyRegistered(info.name));
        }
        let id = state.next_id;
        state.next_id += 1;
        info.service_id = id;
        state.by_name.insert(info.name.clone(), id);
        state.by_id.insert(id, info);
        info!(service_id = id, "service registered");

        let mut buf = Buffer::new();
        Writer::new(&mut buf).write_u32(id);
        Ok(buf)
    }

    async fn unregister(&self, msg: &Message) -> Result<Buffer> {
        let id = Reader::new(msg.body.as_slice()).read_u32()?;
        let mut state = self.state.lock().await;
        let info = state.by_id.remove(&id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        state.by_name.remove(&info.name);

        // Unregistering one service from a machine/process is treated as
        // that whole server node going away: drop every other ServiceInfo
        // sharing its machine_id + process_id.
        let siblings: Vec<u32> = state
            .by_id
            .iter()
            .filter(|(_, other)| other.machine_id == info.machine_id && other.process_id == info.process_id)
            .map(|(id, _)| *id)
            .collect();
        for sibling_id in siblings {
            if let Some(sibling) = state.by_id.remove(&sibling_id) {
                state.by_name.remove(&sibling.name);
                warn!(service_id = sibling_id, "removed alongside node teardown");
            }
        }
        Ok(Buffer::new())
    }

    async fn list(&self) -> Result<Buffer> {
        let state = self.state.lock().await;
        let infos: Vec<ServiceInfo> = state.by_id.values().cloned().collect();
        Ok(encode_list(&infos))
    }

    async fn lookup(&self, msg: &Message) -> Result<Buffer> {
        let name = Reader::new(msg.body.as_slice()).read_string()?;
        let state = self.state.lock().await;
        let id = state.by_name.get(&name).copied().ok_or_else(|| Error::NotFound(name.clone()))?;
        let info = state.by_id.get(&id).expect("by_name and by_id are kept in sync");
        Ok(info.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info(name: &str) -> ServiceInfo {
        ServiceInfo {
            name: name.to_string(),
            machine_id: "m1".into(),
            process_id: 42,
            endpoints: vec![Url::new("127.0.0.1", 9559)],
            service_id: 0,
        }
    }

    #[test]
    fn service_info_round_trips_through_codec() {
        let info = sample_info("echo");
        let bytes = info.encode().into_vec();
        let decoded = ServiceInfo::decode(&bytes).unwrap();
        assert_eq!(decoded.name, "echo");
        assert_eq!(decoded.machine_id, "m1");
        assert_eq!(decoded.endpoints, vec![Url::new("127.0.0.1", 9559)]);
    }

    #[tokio::test]
    async fn register_then_lookup_returns_assigned_id() {
        let sink = DirectorySink {
            state: Arc::new(Mutex::new(State::new())),
        };
        let reg_body = sample_info("echo").encode();
        let reg = Message::call(1, SERVICE_DIRECTORY, PATH_MAIN, FN_REGISTER_SERVICE, reg_body);
        let reply = sink.dispatch(&reg).await;
        assert_eq!(reply.header.kind, MessageType::Reply);
        let id = Reader::new(reply.body.as_slice()).read_u32().unwrap();
        assert_eq!(id, 2);

        let mut lookup_body = Buffer::new();
        Writer::new(&mut lookup_body).write_string("echo");
        let lookup = Message::call(2, SERVICE_DIRECTORY, PATH_MAIN, FN_SERVICE, lookup_body);
        let reply = sink.dispatch(&lookup).await;
        assert_eq!(reply.header.kind, MessageType::Reply);
        let found = ServiceInfo::decode(reply.body.as_slice()).unwrap();
        assert_eq!(found.service_id, 2);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let sink = DirectorySink {
            state: Arc::new(Mutex::new(State::new())),
        };
        let reg_body = sample_info("echo").encode();
        let reg = Message::call(1, SERVICE_DIRECTORY, PATH_MAIN, FN_REGISTER_SERVICE, reg_body.clone());
        sink.dispatch(&reg).await;
        let reg2 = Message::call(2, SERVICE_DIRECTORY, PATH_MAIN, FN_REGISTER_SERVICE, reg_body);
        let reply = sink.dispatch(&reg2).await;
        assert_eq!(reply.header.kind, MessageType::Error);
    }

    #[tokio::test]
    async fn unregister_cascades_to_sibling_services_on_same_node() {
        let sink = DirectorySink {
            state: Arc::new(Mutex::new(State::new())),
        };
        let mut a = sample_info("a");
        a.machine_id = "same".into();
        a.process_id = 7;
        let mut b = sample_info("b");
        b.machine_id = "same".into();
        b.process_id = 7;

        let reply_a = sink
            .dispatch(&Message::call(1, SERVICE_DIRECTORY, PATH_MAIN, FN_REGISTER_SERVICE, a.encode()))
            .await;
        let id_a = Reader::new(reply_a.body.as_slice()).read_u32().unwrap();
        sink.dispatch(&Message::call(2, SERVICE_DIRECTORY, PATH_MAIN, FN_REGISTER_SERVICE, b.encode()))
            .await;

        let mut unreg_body = Buffer::new();
        Writer::new(&mut unreg_body).write_u32(id_a);
        sink.dispatch(&Message::call(3, SERVICE_DIRECTORY, PATH_MAIN, FN_UNREGISTER_SERVICE, unreg_body))
            .await;

        let state = sink.state.lock().await;
        assert!(state.by_id.is_empty());
        assert!(state.by_name.is_empty());
    }
}
