//! End-to-end tunnels: client → dispatcher → edge → destination.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::*;
use proxy_dispatcher::http::response::CONNECTION_ESTABLISHED;
use proxy_dispatcher::net::pinned::{dial, PinnedConnectors};
use proxy_dispatcher::repository::InstanceStatus;

fn bearer() -> String {
    format!("Basic {}", TOKEN)
}

async fn expect_established(stream: &mut tokio::net::TcpStream) {
    let mut buf = vec![0u8; CONNECTION_ESTABLISHED.len()];
    tokio::time::timeout(Duration::from_secs(10), stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(buf, CONNECTION_ESTABLISHED);
}

/// Push `payload` through a fresh tunnel and return what came back.
async fn round_trip(payload: Vec<u8>) -> Vec<u8> {
    let (_edge, dispatcher) = spawn_chain().await;
    let (destination, _) = start_echo_destination().await;

    let mut stream = send(dispatcher.addr, &connect_request(destination, Some(&bearer()))).await;
    expect_established(&mut stream).await;

    let (mut rd, mut wr) = stream.into_split();
    let writer = tokio::spawn(async move {
        wr.write_all(&payload).await.unwrap();
        wr.shutdown().await.unwrap();
    });

    let mut echoed = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), rd.read_to_end(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    writer.await.unwrap();
    echoed
}

#[tokio::test]
async fn connect_tunnel_with_no_payload_closes_cleanly() {
    assert!(round_trip(Vec::new()).await.is_empty());
}

#[tokio::test]
async fn connect_tunnel_carries_a_single_byte() {
    assert_eq!(round_trip(vec![0x42]).await, vec![0x42]);
}

#[tokio::test]
async fn connect_tunnel_carries_large_payloads_intact() {
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let echoed = round_trip(payload.clone()).await;
    assert_eq!(echoed.len(), payload.len());
    assert_eq!(echoed, payload);
}

#[tokio::test]
async fn plain_http_is_forwarded_without_hop_by_hop_headers() {
    let (_edge, dispatcher) = spawn_chain().await;
    let (destination, captured) = start_http_destination().await;

    let request = format!(
        "GET http://{0}/path?q=1 HTTP/1.1\r\nHost: {0}\r\nProxy-Authorization: {1}\r\nProxy-Connection: keep-alive\r\nX-Trace: abc\r\n\r\n",
        destination,
        bearer()
    );
    let mut stream = send(dispatcher.addr, &request).await;
    let response = read_all(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 200 OK"), "got {response}");
    assert!(response.ends_with("ok"));

    let head = captured.await.unwrap();
    assert!(head.starts_with("GET /path?q=1 HTTP/1.1\r\n"), "got {head}");
    assert!(head.contains(&format!("Host: {}", destination)));
    assert!(head.contains("X-Trace: abc"));
    assert!(!head.contains("Proxy-Authorization"));
    assert!(!head.contains("Proxy-Connection"));
}

#[tokio::test]
async fn missing_token_is_challenged() {
    let (_edge, dispatcher) = spawn_chain().await;
    let (destination, _) = start_echo_destination().await;

    let mut stream = send(dispatcher.addr, &connect_request(destination, None)).await;
    let (head, body) = split_json(&read_all(&mut stream).await);

    assert!(head.starts_with("HTTP/1.1 407"));
    assert!(head.contains("Proxy-Authenticate: Basic"));
    assert_eq!(body["id"], "no_proxy");
    assert_eq!(body["message"], "No token found");
    assert_eq!(body["method"], "CONNECT");
    assert_eq!(body["url"], destination.to_string());
}

#[tokio::test]
async fn malformed_token_is_challenged() {
    let (_edge, dispatcher) = spawn_chain().await;
    let (destination, _) = start_echo_destination().await;

    for header in ["Basic", "Bearer project-token", "Basic a b"] {
        let mut stream = send(dispatcher.addr, &connect_request(destination, Some(header))).await;
        let (head, body) = split_json(&read_all(&mut stream).await);
        assert!(head.starts_with("HTTP/1.1 407"), "{header}");
        assert!(head.contains("Proxy-Authenticate: Basic"), "{header}");
        assert_eq!(body["id"], "no_proxy", "{header}");
    }
}

#[tokio::test]
async fn unknown_token_is_rejected_without_challenge() {
    let (_edge, dispatcher) = spawn_chain().await;
    let (destination, _) = start_echo_destination().await;

    let mut stream = send(dispatcher.addr, &connect_request(destination, Some("Basic nope"))).await;
    let (head, body) = split_json(&read_all(&mut stream).await);

    assert!(head.starts_with("HTTP/1.1 407"));
    assert!(!head.contains("Proxy-Authenticate"));
    assert_eq!(body["id"], "no_project");
}

#[tokio::test]
async fn project_without_eligible_instance_is_rejected() {
    let cert = TestCert::generate("edge.local");
    let mut stopped = instance("i1", closed_port().await, &cert, 0);
    stopped.status = InstanceStatus::Stopped;
    let dispatcher = spawn_dispatcher(repository(vec![stopped.clone()])).await;
    let (destination, _) = start_echo_destination().await;

    let mut stream = send(dispatcher.addr, &connect_request(destination, Some(&bearer()))).await;
    let (head, body) = split_json(&read_all(&mut stream).await);

    assert!(head.starts_with("HTTP/1.1 407"));
    assert_eq!(body["id"], "no_proxy");
    assert_eq!(dispatcher.repository.instance("i1").unwrap(), stopped);
}

#[tokio::test]
async fn edge_rejecting_the_certificate_surfaces_as_proxy_error() {
    let identity = TestCert::generate("edge.local");
    let stranger = TestCert::generate("other-ca.local");
    let edge = spawn_edge(&identity, &stranger.cert).await;
    let dispatcher = spawn_dispatcher(repository(vec![instance("i1", edge.addr.port(), &identity, 0)])).await;
    let (destination, accepted) = start_echo_destination().await;

    let mut stream = send(dispatcher.addr, &connect_request(destination, Some(&bearer()))).await;
    let (head, body) = split_json(&read_all(&mut stream).await);

    assert!(head.starts_with("HTTP/1.1 500"));
    assert_eq!(body["id"], "proxy_error");
    assert_eq!(body["message"], "HTTP/1.1 401 connect_error");
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_instance_is_reported() {
    let cert = TestCert::generate("edge.local");
    let dispatcher = spawn_dispatcher(repository(vec![instance("i1", closed_port().await, &cert, 0)])).await;
    let (destination, _) = start_echo_destination().await;

    let mut stream = send(dispatcher.addr, &connect_request(destination, Some(&bearer()))).await;
    let (head, body) = split_json(&read_all(&mut stream).await);

    assert!(head.starts_with("HTTP/1.1 500"));
    assert_eq!(body["id"], "backend_unreachable");
    assert_eq!(dispatcher.metrics.snapshot().errors, 1);
}

#[tokio::test]
async fn least_recently_used_instance_is_claimed() {
    let identity = TestCert::generate("edge.local");
    let edge = spawn_edge(&identity, &identity.cert).await;
    let recent = instance("recent", edge.addr.port(), &identity, 2_000);
    let stale = instance("stale", edge.addr.port(), &identity, 1_000);
    let dispatcher = spawn_dispatcher(repository(vec![recent.clone(), stale])).await;
    let (destination, _) = start_echo_destination().await;

    let mut stream = send(dispatcher.addr, &connect_request(destination, Some(&bearer()))).await;
    expect_established(&mut stream).await;

    let claimed = dispatcher.repository.instance("stale").unwrap();
    assert_eq!(claimed.request_count, 1);
    assert!(claimed.last_connection_ts > 2_000);
    assert_eq!(dispatcher.repository.instance("recent").unwrap(), recent);
}

#[tokio::test]
async fn edge_answers_non_connect_with_not_found() {
    let identity = TestCert::generate("edge.local");
    let edge = spawn_edge(&identity, &identity.cert).await;

    let connector = PinnedConnectors::new()
        .connector("i1", &identity.instance_certificate())
        .unwrap();
    let mut tls = dial(&connector, "127.0.0.1", edge.addr.port(), Duration::from_secs(5))
        .await
        .unwrap();
    tls.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    tls.flush().await.unwrap();

    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(10), tls.read_to_end(&mut response)).await;
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 404"));
}

#[tokio::test]
async fn request_counters_follow_traffic() {
    let (edge, dispatcher) = spawn_chain().await;
    let (destination, _) = start_echo_destination().await;

    let mut stream = send(dispatcher.addr, &connect_request(destination, Some(&bearer()))).await;
    expect_established(&mut stream).await;
    stream.write_all(b"ping").await.unwrap();
    stream.shutdown().await.unwrap();
    let mut echoed = Vec::new();
    stream.read_to_end(&mut echoed).await.unwrap();
    assert_eq!(echoed, b"ping");

    assert_eq!(dispatcher.metrics.snapshot().requests, 1);
    assert_eq!(edge.metrics.snapshot().requests, 1);
    assert_eq!(dispatcher.metrics.snapshot().errors, 0);
}
