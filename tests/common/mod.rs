//! Shared harness for integration tests: certificates, destinations and
//! real edge/dispatcher servers on ephemeral ports.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

use proxy_dispatcher::config::{DispatchSettings, ListenerConfig};
use proxy_dispatcher::edge::{EdgeHandler, EdgeServer};
use proxy_dispatcher::http::{Dispatcher, DispatcherServer};
use proxy_dispatcher::lifecycle::Shutdown;
use proxy_dispatcher::load_balancer::BackendSelector;
use proxy_dispatcher::net::tls::{edge_server_config, CaPool};
use proxy_dispatcher::net::{ConnectionTracker, Listener};
use proxy_dispatcher::observability::ProxyMetrics;
use proxy_dispatcher::repository::{
    BackendInstance, InMemoryRepository, InstanceAddress, InstanceCertificate, InstanceStatus,
    Project,
};
use proxy_dispatcher::security::Authenticator;

pub const TOKEN: &str = "project-token";
pub const PROJECT: &str = "project-1";

/// PEM certificate and key.
#[derive(Clone)]
pub struct TestCert {
    pub cert: String,
    pub key: String,
}

impl TestCert {
    pub fn generate(name: &str) -> Self {
        let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
        Self {
            cert: certified.cert.pem(),
            key: certified.key_pair.serialize_pem(),
        }
    }

    pub fn instance_certificate(&self) -> InstanceCertificate {
        InstanceCertificate {
            cert: self.cert.clone(),
            key: self.key.clone(),
        }
    }
}

fn local_listener() -> ListenerConfig {
    ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        max_connections: 64,
    }
}

/// Destination that echoes everything until EOF, then half-closes.
/// The counter tracks accepted connections.
pub async fn start_echo_destination() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.into_split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
                let _ = wr.shutdown().await;
            });
        }
    });

    (addr, accepted)
}

/// Destination speaking just enough HTTP: captures the request head,
/// answers `ok` and closes.
pub async fn start_http_destination() -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        let mut head = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 || line == "\r\n" {
                break;
            }
            head.push_str(&line);
        }
        let _ = tx.send(head);

        let mut socket = reader.into_inner();
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
            .await
            .unwrap();
        let _ = socket.shutdown().await;
    });

    (addr, rx)
}

/// A free port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub struct EdgeHandle {
    pub addr: SocketAddr,
    pub metrics: Arc<ProxyMetrics>,
    pub shutdown: Shutdown,
}

/// Run an edge server presenting `identity` and trusting `ca_pem`.
pub async fn spawn_edge(identity: &TestCert, ca_pem: &str) -> EdgeHandle {
    let ca_pool = CaPool::from_pem(ca_pem.as_bytes()).unwrap();
    let tls = edge_server_config(identity.cert.as_bytes(), identity.key.as_bytes(), &ca_pool, false).unwrap();
    let metrics = Arc::new(ProxyMetrics::new("edge_it"));
    let handler = Arc::new(EdgeHandler::new(
        ca_pool,
        metrics.clone(),
        Duration::from_secs(5),
        Duration::from_secs(5),
        8192,
    ));

    let listener = Listener::bind(&local_listener()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = EdgeServer::new(
        listener,
        TlsAcceptor::from(tls),
        handler,
        Duration::from_secs(5),
        ConnectionTracker::new(),
    );

    let shutdown = Shutdown::new();
    tokio::spawn(server.run(shutdown.subscribe(), Duration::from_secs(1)));
    EdgeHandle { addr, metrics, shutdown }
}

pub struct DispatcherHandle {
    pub addr: SocketAddr,
    pub repository: Arc<InMemoryRepository>,
    pub metrics: Arc<ProxyMetrics>,
    pub shutdown: Shutdown,
}

/// Run a dispatcher over `repository`.
pub async fn spawn_dispatcher(repository: Arc<InMemoryRepository>) -> DispatcherHandle {
    let settings = DispatchSettings {
        connect_timeout_secs: 5,
        handshake_timeout_secs: 5,
        request_head_timeout_secs: 5,
        ..DispatchSettings::default()
    };
    let metrics = Arc::new(ProxyMetrics::new("dispatcher_it"));
    let dispatcher = Arc::new(Dispatcher::new(
        Authenticator::new(repository.clone(), settings.auth_scheme.clone()),
        BackendSelector::new(repository.clone()),
        metrics.clone(),
        settings,
    ));

    let listener = Listener::bind(&local_listener()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = DispatcherServer::new(listener, dispatcher, ConnectionTracker::new());

    let shutdown = Shutdown::new();
    tokio::spawn(server.run(shutdown.subscribe(), Duration::from_secs(1)));
    DispatcherHandle {
        addr,
        repository,
        metrics,
        shutdown,
    }
}

pub fn instance(id: &str, port: u16, cert: &TestCert, last_connection_ts: i64) -> BackendInstance {
    BackendInstance {
        id: id.to_string(),
        project_id: PROJECT.to_string(),
        status: InstanceStatus::Started,
        removing: false,
        address: InstanceAddress {
            hostname: "127.0.0.1".to_string(),
            port,
        },
        certificate: cert.instance_certificate(),
        fingerprint_present: true,
        request_count: 0,
        last_connection_ts,
    }
}

/// Repository with the test project and the given instances.
pub fn repository(instances: Vec<BackendInstance>) -> Arc<InMemoryRepository> {
    let repository = InMemoryRepository::new();
    repository.insert_project(Project {
        id: PROJECT.to_string(),
        token: TOKEN.to_string(),
    });
    for instance in instances {
        repository.upsert_instance(instance).unwrap();
    }
    Arc::new(repository)
}

/// Edge server plus a dispatcher with one instance pointing at it.
pub async fn spawn_chain() -> (EdgeHandle, DispatcherHandle) {
    let identity = TestCert::generate("edge.local");
    let edge = spawn_edge(&identity, &identity.cert).await;
    let dispatcher = spawn_dispatcher(repository(vec![instance("i1", edge.addr.port(), &identity, 0)])).await;
    (edge, dispatcher)
}

/// Send a raw request to the dispatcher.
pub async fn send(addr: SocketAddr, request: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

pub fn connect_request(target: SocketAddr, authorization: Option<&str>) -> String {
    let mut request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n", target);
    if let Some(value) = authorization {
        request.push_str(&format!("Proxy-Authorization: {}\r\n", value));
    }
    request.push_str("\r\n");
    request
}

/// Read a complete error response (the dispatcher closes after it).
pub async fn read_all(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8(raw).unwrap()
}

/// Split a response into its head and JSON body.
pub fn split_json(response: &str) -> (String, serde_json::Value) {
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    (head.to_string(), serde_json::from_str(body).unwrap())
}
