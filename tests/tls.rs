//! TLS termination, redirector and listener combinations.

use std::sync::Arc;

use edge_server::acme::CertificateIssuer;
use edge_server::net::Listeners;
use tokio::net::TcpStream;

mod common;

fn with_allow_list(mut config: edge_server::EdgeConfig, hosts: &[&str]) -> edge_server::EdgeConfig {
    config.acme.allow = hosts.iter().map(|h| h.to_string()).collect();
    config
}

#[tokio::test]
async fn https_request_is_proxied_with_forwarded_proto() {
    let (backend, mut seen) = common::start_recording_backend("secure hello").await;
    let cache = tempfile::tempdir().unwrap();
    let ca = common::TestCa::new();
    let (tls, tls_addr) = common::ephemeral_listener();

    let config = with_allow_list(
        common::proxy_config("secure.test", backend, cache.path()),
        &["secure.test"],
    );
    let shutdown = common::spawn_edge(
        config,
        Listeners::Activated { tls, plain: None },
        Some(ca.clone() as Arc<dyn CertificateIssuer>),
    )
    .await;

    let connector = common::tls_connector(ca.root());
    let mut stream = common::tls_connect(&connector, tls_addr, "secure.test")
        .await
        .expect("handshake failed");
    let response = common::raw_get(&mut stream, "secure.test", "/hello").await;

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("secure hello"), "{response}");

    let recorded = seen.recv().await.unwrap();
    assert_eq!(recorded.headers["x-forwarded-proto"], "https");
    assert_eq!(recorded.headers["host"], "secure.test");

    // Second connection is served from memory.
    let mut again = common::tls_connect(&connector, tls_addr, "secure.test")
        .await
        .unwrap();
    let response = common::raw_get(&mut again, "secure.test", "/hello").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert_eq!(ca.calls(), 1);
    assert!(cache.path().join("secure.test").exists());

    shutdown.trigger();
}

#[tokio::test]
async fn host_outside_allow_list_gets_no_certificate() {
    let (backend, _seen) = common::start_recording_backend("unused").await;
    let cache = tempfile::tempdir().unwrap();
    let ca = common::TestCa::new();
    let (tls, tls_addr) = common::ephemeral_listener();

    let config = with_allow_list(
        common::proxy_config("secure.test", backend, cache.path()),
        &["secure.test"],
    );
    let shutdown = common::spawn_edge(
        config,
        Listeners::Activated { tls, plain: None },
        Some(ca.clone() as Arc<dyn CertificateIssuer>),
    )
    .await;

    let connector = common::tls_connector(ca.root());
    let result = common::tls_connect(&connector, tls_addr, "intruder.test").await;
    assert!(result.is_err());
    assert_eq!(ca.calls(), 0);
    assert!(!cache.path().join("intruder.test").exists());

    shutdown.trigger();
}

#[tokio::test]
async fn plain_listener_next_to_tls_redirects() {
    let (backend, mut seen) = common::start_recording_backend("unused").await;
    let cache = tempfile::tempdir().unwrap();
    let ca = common::TestCa::new();
    let (tls, _) = common::ephemeral_listener();
    let (plain, plain_addr) = common::ephemeral_listener();

    let shutdown = common::spawn_edge(
        common::proxy_config("secure.test", backend, cache.path()),
        Listeners::Activated {
            tls,
            plain: Some(plain),
        },
        Some(ca.clone() as Arc<dyn CertificateIssuer>),
    )
    .await;

    let res = common::client()
        .post(format!("http://{}/submit?x=1", plain_addr))
        .header("Host", "secure.test")
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 308);
    assert_eq!(res.headers()["location"], "https://secure.test/submit?x=1");
    assert!(seen.try_recv().is_err(), "redirector must not proxy");
    assert_eq!(ca.calls(), 0);

    shutdown.trigger();
}

#[tokio::test]
async fn tls_only_activation_has_no_plaintext_service() {
    let (backend, _seen) = common::start_recording_backend("unused").await;
    let cache = tempfile::tempdir().unwrap();
    let ca = common::TestCa::new();
    let (tls, tls_addr) = common::ephemeral_listener();

    let shutdown = common::spawn_edge(
        common::proxy_config("secure.test", backend, cache.path()),
        Listeners::Activated { tls, plain: None },
        Some(ca.clone() as Arc<dyn CertificateIssuer>),
    )
    .await;

    // Plain HTTP on the TLS port is not a valid ClientHello.
    let mut stream = TcpStream::connect(tls_addr).await.unwrap();
    let response = common::raw_get(&mut stream, "secure.test", "/").await;
    assert!(!response.starts_with("HTTP/1.1"), "{response}");
    assert_eq!(ca.calls(), 0);

    shutdown.trigger();
}
