//! Gateway Server: plaintext and TLS listeners sharing one router, one
//! shutdown signal and one set of client registries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::GatewayError;
use crate::server::limiter::ConnectionLimiter;
use crate::server::listener::{ListenerState, ResilientListener};
use crate::server::registry::ClientRegistry;
use crate::server::tls;

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub name: String,
    pub http_addr: Option<String>,
    pub https_addr: Option<String>,
    pub cert_file: String,
    pub key_file: String,
    /// Per listener; `<= 0` means unlimited.
    pub max_clients: i64,
    pub shutdown_grace: Duration,
}

impl GatewayOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());
        Self {
            name: config.name.clone(),
            http_addr: non_empty(&config.http_addr),
            https_addr: non_empty(&config.https_addr),
            cert_file: config.cert_file.clone(),
            key_file: config.key_file.clone(),
            max_clients: config.max_clients,
            shutdown_grace: config.shutdown_grace(),
        }
    }

    /// Plaintext only, on `addr`.
    pub fn http(name: &str, addr: &str, max_clients: i64) -> Self {
        Self {
            name: name.to_string(),
            http_addr: Some(addr.to_string()),
            https_addr: None,
            cert_file: String::new(),
            key_file: String::new(),
            max_clients,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

// ========================================
// STATUS
// ========================================

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub id: String,
    pub name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub server_time: String,
    pub shutting_down: bool,
    pub listeners: Vec<ListenerStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenerStatus {
    pub name: String,
    pub addr: String,
    pub local_addr: Option<String>,
    pub tls: bool,
    pub state: ListenerState,
    pub serve_cycles: usize,
    /// Accepted sockets still open.
    pub connections: usize,
    /// Admission tokens out, counting the one held by a waiting accept.
    pub tokens_in_use: usize,
    pub max_connections: Option<usize>,
    pub utilization: f64,
}

// ========================================
// GATEWAY
// ========================================

pub struct GatewayServer {
    id: String,
    name: String,
    started_at: Instant,
    shutdown: CancellationToken,
    shutting_down: AtomicBool,
    grace: Duration,
    http: Option<Arc<ResilientListener>>,
    https: Option<Arc<ResilientListener>>,
    registry: ClientRegistry,
}

impl GatewayServer {
    /// Validates addresses and loads the certificate. Both failures are
    /// configuration errors and stop the process before anything serves.
    pub fn new(options: GatewayOptions) -> Result<Self, GatewayError> {
        let shutdown = CancellationToken::new();

        let http = match &options.http_addr {
            Some(addr) => Some(Arc::new(ResilientListener::new(
                format!("{} http", options.name),
                addr,
                None,
                Arc::new(ConnectionLimiter::new(options.max_clients)),
                shutdown.clone(),
            )?)),
            None => None,
        };

        let https = match &options.https_addr {
            Some(addr) => {
                let acceptor = tls::load_acceptor(&options.cert_file, &options.key_file)?;
                Some(Arc::new(ResilientListener::new(
                    format!("{} https", options.name),
                    addr,
                    Some(acceptor),
                    Arc::new(ConnectionLimiter::new(options.max_clients)),
                    shutdown.clone(),
                )?))
            }
            None => None,
        };

        if http.is_none() && https.is_none() {
            return Err(GatewayError::NoListener);
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: options.name,
            started_at: Instant::now(),
            shutdown,
            shutting_down: AtomicBool::new(false),
            grace: options.shutdown_grace,
            http,
            https,
            registry: ClientRegistry::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn http_listener(&self) -> Option<&Arc<ResilientListener>> {
        self.http.as_ref()
    }

    pub fn https_listener(&self) -> Option<&Arc<ResilientListener>> {
        self.https.as_ref()
    }

    fn listeners(&self) -> impl Iterator<Item = &Arc<ResilientListener>> {
        self.http.iter().chain(self.https.iter())
    }

    /// Start every configured listener on `router`. Bind failures are
    /// retried in the background and never reported here.
    pub fn start(&self, router: Router) {
        for listener in self.listeners() {
            listener.start(router.clone());
            info!(gateway = %self.name, listener = listener.name(), addr = listener.addr(), "listener started");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await
    }

    /// Stop accepting on every listener, give in-flight connections the
    /// grace period, then force the remaining listeners closed.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            self.wait_closed().await;
            return;
        }

        info!(gateway = %self.name, grace = ?self.grace, "shutting down");
        self.shutdown.cancel();

        if tokio::time::timeout(self.grace, self.wait_closed()).await.is_err() {
            warn!(gateway = %self.name, "grace period elapsed, forcing listeners closed");
            for listener in self.listeners() {
                listener.abort();
            }
        }
        info!(gateway = %self.name, "shutdown complete");
    }

    async fn wait_closed(&self) {
        join_all(self.listeners().map(|listener| listener.closed())).await;
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            id: self.id.clone(),
            name: self.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            server_time: chrono::Utc::now().to_rfc3339(),
            shutting_down: self.is_shutting_down(),
            listeners: self.listeners().map(|l| listener_status(l)).collect(),
        }
    }
}

fn listener_status(listener: &ResilientListener) -> ListenerStatus {
    let limiter = listener.limiter();
    ListenerStatus {
        name: listener.name().to_string(),
        addr: listener.addr().to_string(),
        local_addr: listener.local_addr().map(|a| a.to_string()),
        tls: listener.is_tls(),
        state: listener.state(),
        serve_cycles: listener.serve_cycles(),
        connections: limiter.connections(),
        tokens_in_use: limiter.in_use(),
        max_connections: limiter.capacity(),
        utilization: limiter.utilization(),
    }
}
