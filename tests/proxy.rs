//! Reverse proxy behaviour through a running edge server.

use std::time::Duration;

use edge_server::net::Listeners;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

mod common;

#[tokio::test]
async fn standard_request_reaches_backend() {
    let (backend, mut seen) = common::start_recording_backend("hello from backend").await;
    let cache = tempfile::tempdir().unwrap();
    let (listener, addr) = common::ephemeral_listener();
    let shutdown = common::spawn_edge(
        common::proxy_config("drone.test", backend, cache.path()),
        Listeners::Fallback(listener),
        None,
    )
    .await;

    let res = common::client()
        .get(format!("http://{}/api/items?page=2", addr))
        .header("Host", "drone.test")
        .send()
        .await
        .expect("edge unreachable");

    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "hello from backend");

    let recorded = seen.recv().await.unwrap();
    assert_eq!(recorded.request_line, "GET /api/items?page=2 HTTP/1.1");
    assert_eq!(recorded.headers["host"], "drone.test");
    assert_eq!(recorded.headers["x-forwarded-for"], "127.0.0.1");
    assert!(!recorded.headers.contains_key("user-agent"));
    assert!(!recorded.headers.contains_key("x-forwarded-proto"));

    shutdown.trigger();
}

#[tokio::test]
async fn unknown_host_is_not_found() {
    let (backend, _seen) = common::start_recording_backend("unused").await;
    let cache = tempfile::tempdir().unwrap();
    let (listener, addr) = common::ephemeral_listener();
    let shutdown = common::spawn_edge(
        common::proxy_config("drone.test", backend, cache.path()),
        Listeners::Fallback(listener),
        None,
    )
    .await;

    let res = common::client()
        .get(format!("http://{}/", addr))
        .header("Host", "other.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    shutdown.trigger();
}

#[tokio::test]
async fn dead_backend_is_bad_gateway() {
    let (dead, dead_addr) = common::ephemeral_listener();
    drop(dead);

    let cache = tempfile::tempdir().unwrap();
    let (listener, addr) = common::ephemeral_listener();
    let shutdown = common::spawn_edge(
        common::proxy_config("drone.test", dead_addr, cache.path()),
        Listeners::Fallback(listener),
        None,
    )
    .await;

    let res = common::client()
        .get(format!("http://{}/", addr))
        .header("Host", "drone.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);

    shutdown.trigger();
}

#[tokio::test]
async fn stalled_backend_is_gateway_timeout() {
    let backend = common::start_stalling_backend().await;
    let cache = tempfile::tempdir().unwrap();
    let (listener, addr) = common::ephemeral_listener();
    let mut config = common::proxy_config("drone.test", backend, cache.path());
    config.timeouts.write_secs = 1;
    let shutdown = common::spawn_edge(config, Listeners::Fallback(listener), None).await;

    let res = common::client()
        .get(format!("http://{}/slow", addr))
        .header("Host", "drone.test")
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);

    shutdown.trigger();
}

#[tokio::test]
async fn tunnel_to_dead_backend_is_bad_gateway() {
    let (dead, dead_addr) = common::ephemeral_listener();
    drop(dead);

    let cache = tempfile::tempdir().unwrap();
    let (listener, addr) = common::ephemeral_listener();
    let shutdown = common::spawn_edge(
        common::proxy_config("drone.test", dead_addr, cache.path()),
        Listeners::Fallback(listener),
        None,
    )
    .await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(
            b"GET /ws HTTP/1.1\r\nHost: drone.test\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
        )
        .await
        .unwrap();

    let head = tokio::time::timeout(Duration::from_secs(5), common::read_head(&mut client))
        .await
        .expect("no answer to tunnel request")
        .unwrap();
    assert!(head.starts_with("HTTP/1.1 502"), "{head}");

    shutdown.trigger();
}

#[tokio::test]
async fn raw_tunnel_relays_and_propagates_close() {
    let (backend, mut seen) = common::start_raw_upgrade_backend().await;
    let cache = tempfile::tempdir().unwrap();
    let (listener, addr) = common::ephemeral_listener();
    let shutdown = common::spawn_edge(
        common::proxy_config("drone.test", backend, cache.path()),
        Listeners::Fallback(listener),
        None,
    )
    .await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(
            b"GET /ws HTTP/1.1\r\nHost: drone.test\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
        )
        .await
        .unwrap();

    let head = common::read_head(&mut client).await.unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "{head}");

    let recorded = seen.recv().await.unwrap();
    assert_eq!(recorded.request_line, "GET /ws HTTP/1.1");
    assert_eq!(recorded.headers["upgrade"], "websocket");
    assert_eq!(recorded.headers["host"], "drone.test");

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .expect("no echo through tunnel")
        .unwrap();
    assert_eq!(&buf, b"ping");

    client.write_all(b"quit").await.unwrap();
    let mut rest = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut rest))
        .await
        .expect("tunnel stayed open after backend closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    shutdown.trigger();
}

#[tokio::test]
async fn websocket_round_trip() {
    let backend = common::start_websocket_backend().await;
    let cache = tempfile::tempdir().unwrap();
    let (listener, addr) = common::ephemeral_listener();
    let shutdown = common::spawn_edge(
        common::proxy_config("127.0.0.1", backend, cache.path()),
        Listeners::Fallback(listener),
        None,
    )
    .await;

    let (mut ws, response) = tokio_tungstenite::connect_async(format!("ws://{}/socket", addr))
        .await
        .expect("websocket handshake through edge failed");
    assert_eq!(response.status(), 101);

    ws.send(Message::Text("hello".into())).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no reply")
        .unwrap()
        .unwrap();
    assert_eq!(reply.to_text().unwrap(), "hello");

    ws.close(None).await.unwrap();
    shutdown.trigger();
}

#[tokio::test]
async fn services_site_answers_version_and_redirects() {
    let cache = tempfile::tempdir().unwrap();
    let config = edge_server::config::parse_config(&format!(
        r#"
        [acme]
        cache_dir = "{}"

        [[sites]]
        host = "example.test"
        services = [
            {{ kind = "version" }},
            {{ kind = "redirect", target = "https://github.com/example", paths = ["/"] }},
        ]
        "#,
        cache.path().display()
    ))
    .unwrap();

    let (listener, addr) = common::ephemeral_listener();
    let shutdown = common::spawn_edge(config, Listeners::Fallback(listener), None).await;
    let client = common::client();

    let res = client
        .get(format!("http://{}/_debug/version", addr))
        .header("Host", "example.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.text().await.unwrap().starts_with("version: "));

    let res = client
        .get(format!("http://{}/", addr))
        .header("Host", "example.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 302);
    assert_eq!(res.headers()["location"], "https://github.com/example");

    let res = client
        .get(format!("http://{}/missing", addr))
        .header("Host", "example.test")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    shutdown.trigger();
}
