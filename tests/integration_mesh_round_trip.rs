use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qi_mesh::session::ServiceObject;
use qi_mesh::{Buffer, Error, NetworkReactor, ServiceDirectory, Session, Url};

struct EchoService;

#[async_trait]
impl ServiceObject for EchoService {
    async fn invoke(&self, _function: u32, args: &[u8]) -> qi_mesh::Result<Buffer> {
        Ok(Buffer::from_vec(args.to_vec()))
    }
}

async fn spawn_directory(reactor: Arc<NetworkReactor>) -> (ServiceDirectory, String) {
    let directory = ServiceDirectory::listen(reactor, &Url::new("127.0.0.1", 0))
        .await
        .expect("directory listen");
    let url = directory.endpoints()[0].to_string();
    (directory, url)
}

#[tokio::test]
async fn echo_end_to_end() {
    let reactor = Arc::new(NetworkReactor::start().unwrap());
    let (_directory, directory_url) = spawn_directory(reactor.clone()).await;

    let server = Session::new(reactor.clone());
    server.connect(&directory_url).await.unwrap();
    server.listen("tcp://127.0.0.1:0").await.unwrap();
    server.register_service("echo", Arc::new(EchoService)).await.unwrap();

    // Give the directory's accept loop a moment to finish wiring the
    // server's own connection before the client resolves it.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = Session::new(reactor);
    client.connect(&directory_url).await.unwrap();
    let proxy = client.service("echo").await.unwrap();

    let mut args = Buffer::new();
    qi_mesh::codec::Writer::new(&mut args).write_string("hello mesh");
    let reply = proxy.call(0, args).await.unwrap();

    let mut reader = qi_mesh::codec::Reader::new(reply.body.as_slice());
    assert_eq!(reader.read_string().unwrap(), "hello mesh");
}

#[tokio::test]
async fn registering_the_same_name_twice_fails() {
    let reactor = Arc::new(NetworkReactor::start().unwrap());
    let (_directory, directory_url) = spawn_directory(reactor.clone()).await;

    let server = Session::new(reactor);
    server.connect(&directory_url).await.unwrap();
    server.listen("tcp://127.0.0.1:0").await.unwrap();
    server.register_service("echo", Arc::new(EchoService)).await.unwrap();

    let err = server
        .register_service("echo", Arc::new(EchoService))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRegistered(name) if name == "echo"));
}

#[tokio::test]
async fn disconnect_fails_pending_calls() {
    let reactor = Arc::new(NetworkReactor::start().unwrap());
    let (_directory, directory_url) = spawn_directory(reactor.clone()).await;

    let client = Session::new(reactor);
    client.connect(&directory_url).await.unwrap();
    client.close().await;

    let err = client.service("echo").await.unwrap_err();
    assert!(matches!(err, Error::Disconnected));
}

#[tokio::test]
async fn wildcard_listen_resolves_to_concrete_endpoint() {
    let reactor = Arc::new(NetworkReactor::start().unwrap());
    let (directory, _url) = spawn_directory(reactor).await;

    assert!(!directory.endpoints().is_empty());
    for endpoint in directory.endpoints() {
        assert_ne!(endpoint.host, "0.0.0.0");
        assert_ne!(endpoint.port, 0);
    }
}

#[tokio::test]
async fn concurrent_service_calls_share_one_pooled_socket() {
    let reactor = Arc::new(NetworkReactor::start().unwrap());
    let (_directory, directory_url) = spawn_directory(reactor.clone()).await;

    let server = Session::new(reactor.clone());
    server.connect(&directory_url).await.unwrap();
    server.listen("tcp://127.0.0.1:0").await.unwrap();
    server.register_service("echo", Arc::new(EchoService)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = Arc::new(Session::new(reactor));
    client.connect(&directory_url).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let proxy = client.service("echo").await.unwrap();
            proxy.socket_id()
        }));
    }
    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }
    assert_eq!(ids.len(), 1, "all concurrent service() calls should share one socket");
}

#[tokio::test]
async fn service_not_found_surfaces_not_found_error() {
    let reactor = Arc::new(NetworkReactor::start().unwrap());
    let (_directory, directory_url) = spawn_directory(reactor).await;

    let client = Session::new(Arc::new(NetworkReactor::start().unwrap()));
    client.connect(&directory_url).await.unwrap();
    let err = client.service("does-not-exist").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
