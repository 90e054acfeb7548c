mod helpers;
use helpers::{http_request, wait_until};

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use kateway::server::{tls, ConnectionLimiter, ListenerState, ResilientListener};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

fn hello_router() -> Router {
    Router::new().route("/", get(|| async { "hello" }))
}

fn listener(addr: &str, capacity: i64, shutdown: &CancellationToken) -> Arc<ResilientListener> {
    Arc::new(
        ResilientListener::new(
            "test http",
            addr,
            None,
            Arc::new(ConnectionLimiter::new(capacity)),
            shutdown.clone(),
        )
        .unwrap(),
    )
}

// =========================================================================================
// 1. SERVING
// =========================================================================================

mod serving {
    use super::*;

    #[tokio::test]
    async fn test_serves_requests() {
        let shutdown = CancellationToken::new();
        let listener = listener("127.0.0.1:0", 8, &shutdown);
        listener.start(hello_router());

        let addr = listener.serving().await.expect("listener should bind");
        assert_eq!(listener.state(), ListenerState::Serving);

        let (status, body) = http_request(addr, "GET", "/").await;
        assert_eq!(status, 200);
        assert_eq!(body, "hello");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_serve_loop() {
        let shutdown = CancellationToken::new();
        let listener = listener("127.0.0.1:0", 8, &shutdown);
        listener.start(hello_router());
        listener.start(hello_router());

        let addr = listener.serving().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.local_addr(), Some(addr), "no second bind happened");

        shutdown.cancel();
        timeout(Duration::from_secs(2), listener.closed())
            .await
            .expect("listener should close once");
    }

    #[tokio::test]
    async fn test_token_released_when_client_closes() {
        let shutdown = CancellationToken::new();
        let listener = listener("127.0.0.1:0", 4, &shutdown);
        listener.start(hello_router());
        let addr = listener.serving().await.unwrap();

        // The accept loop holds one token while it waits for the next socket.
        assert!(wait_until(Duration::from_secs(2), || listener.limiter().in_use() == 1).await);

        assert_eq!(listener.limiter().connections(), 0);

        let client = TcpStream::connect(addr).await.unwrap();
        assert!(wait_until(Duration::from_secs(2), || listener.limiter().in_use() == 2).await);
        assert_eq!(listener.limiter().connections(), 1);

        drop(client);
        assert!(wait_until(Duration::from_secs(2), || listener.limiter().in_use() == 1).await);
        assert_eq!(listener.limiter().available(), Some(3));
        assert_eq!(listener.limiter().connections(), 0);

        shutdown.cancel();
    }
}

// =========================================================================================
// 2. ADMISSION CONTROL
// =========================================================================================

mod admission {
    use super::*;

    #[tokio::test]
    async fn test_connection_over_capacity_waits() {
        let shutdown = CancellationToken::new();
        let listener = listener("127.0.0.1:0", 1, &shutdown);
        listener.start(hello_router());
        let addr = listener.serving().await.unwrap();

        let idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.limiter().available(), Some(0));

        let pending = tokio::spawn(http_request(addr, "GET", "/"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!pending.is_finished(), "second client must wait for a free slot");

        drop(idle);
        let (status, body) = timeout(Duration::from_secs(2), pending)
            .await
            .expect("second client should be served after the slot frees")
            .unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "hello");

        shutdown.cancel();
    }
}

// =========================================================================================
// 3. BIND RETRY & SHUTDOWN
// =========================================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_rebinds_after_address_frees_up() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = blocker.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let listener = listener(&addr.to_string(), 8, &shutdown);
        listener.start(hello_router());

        assert!(
            wait_until(Duration::from_secs(2), || listener.state() == ListenerState::Backoff).await,
            "bind failure should put the listener in backoff"
        );

        drop(blocker);
        let bound = timeout(Duration::from_secs(3), listener.serving())
            .await
            .expect("listener should recover once the port is free");
        assert_eq!(bound, Some(addr));

        let (status, _) = http_request(addr, "GET", "/").await;
        assert_eq!(status, 200);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_ended_cycle_binds_again() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let shutdown = CancellationToken::new();
        let listener = listener(&addr.to_string(), 8, &shutdown);
        listener.start(hello_router());
        assert_eq!(listener.serving().await, Some(addr));
        assert_eq!(listener.serve_cycles(), 1);

        listener.rebind();
        assert!(
            wait_until(Duration::from_secs(2), || listener.serve_cycles() == 2
                && listener.state() == ListenerState::Serving)
            .await,
            "listener should serve again after the cycle ends"
        );
        assert!(!shutdown.is_cancelled());
        assert!(!listener.limiter().is_closed());

        let (status, body) = http_request(addr, "GET", "/").await;
        assert_eq!(status, 200);
        assert_eq!(body, "hello");

        shutdown.cancel();
        timeout(Duration::from_secs(2), listener.closed()).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff_is_terminal() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = blocker.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let listener = listener(&addr.to_string(), 8, &shutdown);
        listener.start(hello_router());
        assert!(wait_until(Duration::from_secs(2), || listener.state() == ListenerState::Backoff).await);

        shutdown.cancel();
        timeout(Duration::from_secs(2), listener.closed())
            .await
            .expect("shutdown must end the retry loop");
        assert_eq!(listener.state(), ListenerState::Closed);

        drop(blocker);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.state(), ListenerState::Closed, "closed is terminal");
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_waiting_accept() {
        let shutdown = CancellationToken::new();
        let listener = listener("127.0.0.1:0", 1, &shutdown);
        listener.start(hello_router());
        let addr = listener.serving().await.unwrap();

        // Fill the only slot so the accept loop blocks on admission.
        let (status, _) = http_request(addr, "GET", "/").await;
        assert_eq!(status, 200);
        let idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.limiter().in_use(), 1);

        shutdown.cancel();
        assert!(
            wait_until(Duration::from_secs(1), || listener.limiter().is_closed()).await,
            "shutdown waiter closes admission"
        );

        drop(idle);
        timeout(Duration::from_secs(2), listener.closed())
            .await
            .expect("listener should close after shutdown");
        assert!(wait_until(Duration::from_secs(2), || listener.limiter().in_use() == 0).await);
    }
}

// =========================================================================================
// 4. TLS
// =========================================================================================

mod tls_serving {
    use super::*;

    fn https_listener(shutdown: &CancellationToken) -> Arc<ResilientListener> {
        let acceptor = tls::load_acceptor(
            &format!("{}/server.pem", FIXTURES),
            &format!("{}/server.key", FIXTURES),
        )
        .unwrap();
        Arc::new(
            ResilientListener::new(
                "test https",
                "127.0.0.1:0",
                Some(acceptor),
                Arc::new(ConnectionLimiter::new(4)),
                shutdown.clone(),
            )
            .unwrap(),
        )
    }

    fn connector() -> TlsConnector {
        let ca = std::fs::read(format!("{}/ca.pem", FIXTURES)).unwrap();
        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut ca.as_slice()) {
            roots.add(cert.unwrap()).unwrap();
        }
        let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    }

    #[tokio::test]
    async fn test_request_over_tls() {
        let shutdown = CancellationToken::new();
        let listener = https_listener(&shutdown);
        listener.start(hello_router());
        let addr = listener.serving().await.unwrap();
        assert!(listener.is_tls());

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut stream = connector()
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .expect("handshake should succeed");
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        // Read until the peer closes; a missing close_notify is not a failure here.
        let mut raw = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match timeout(Duration::from_secs(2), stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
                Ok(Ok(n)) => raw.extend_from_slice(&chunk[..n]),
            }
        }
        let text = String::from_utf8_lossy(&raw);
        assert!(text.starts_with("HTTP/1.1 200"), "{text}");
        assert!(text.ends_with("hello"), "{text}");

        drop(stream);
        assert!(wait_until(Duration::from_secs(2), || listener.limiter().connections() == 0).await);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_failed_handshake_returns_token() {
        let shutdown = CancellationToken::new();
        let listener = https_listener(&shutdown);
        listener.start(hello_router());
        let addr = listener.serving().await.unwrap();

        let mut garbage = TcpStream::connect(addr).await.unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || listener.limiter().connections() == 1).await,
            "socket is admitted while its handshake is pending"
        );
        garbage
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        // The client stays connected; the rejected handshake alone frees the slot.
        assert!(
            wait_until(Duration::from_secs(2), || listener.limiter().connections() == 0
                && listener.limiter().in_use() == 1)
            .await,
            "a failed handshake must release its token"
        );

        let (status, body) = {
            let tcp = TcpStream::connect(addr).await.unwrap();
            let mut stream = connector()
                .connect(ServerName::try_from("localhost").unwrap(), tcp)
                .await
                .unwrap();
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let mut raw = Vec::new();
            let _ = timeout(Duration::from_secs(2), stream.read_to_end(&mut raw)).await;
            let text = String::from_utf8_lossy(&raw).to_string();
            (text.starts_with("HTTP/1.1 200"), text)
        };
        assert!(status, "listener keeps serving after a bad handshake: {body}");

        drop(garbage);
        shutdown.cancel();
    }
}
