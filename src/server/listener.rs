//! Resilient Listener: one bind/accept loop that survives a flapping
//! interface.
//!
//! ```text
//! Unbound --bind ok--> Serving --serve loop exits--> Unbound
//!    |                                                  ^
//!    +--bind failed--> Backoff --delay elapsed----------+
//! any state --shutdown--> Closed
//! ```
//!
//! Connections are admitted through a `ConnectionLimiter` before they are
//! accepted, and keep their `AdmissionToken` for as long as the socket lives.
//! `abort` force-closes whatever is still connected: pending handlers are
//! dropped and socket I/O fails, so every token comes back.

use std::io;
use std::net::SocketAddr;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::serve::Listener;
use axum::Router;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;
use crate::server::backoff::Backoff;
use crate::server::limiter::{AdmissionToken, ConnectionLimiter};

const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Unbound,
    Serving,
    Backoff,
    Closed,
}

// ========================================
// RESILIENT LISTENER
// ========================================

pub struct ResilientListener {
    name: String,
    addr: String,
    tls: Option<TlsAcceptor>,
    limiter: Arc<ConnectionLimiter>,
    shutdown: CancellationToken,
    /// Cancelled by `abort`; ends connections that outlived the grace period.
    force: CancellationToken,
    /// Token of the serving cycle in progress.
    cycle: Mutex<Option<CancellationToken>>,
    serve_cycles: AtomicUsize,
    state: watch::Sender<ListenerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    serve_task: OnceCell<JoinHandle<()>>,
    exit_waiter: OnceCell<JoinHandle<()>>,
}

impl ResilientListener {
    /// `addr` is `host:port` or `:port`. Anything else is a configuration
    /// error and is reported here, never retried.
    pub fn new(
        name: impl Into<String>,
        addr: &str,
        tls: Option<TlsAcceptor>,
        limiter: Arc<ConnectionLimiter>,
        shutdown: CancellationToken,
    ) -> Result<Self, GatewayError> {
        let (state, _) = watch::channel(ListenerState::Unbound);
        Ok(Self {
            name: name.into(),
            addr: normalize_addr(addr)?,
            tls,
            limiter,
            shutdown,
            force: CancellationToken::new(),
            cycle: Mutex::new(None),
            serve_cycles: AtomicUsize::new(0),
            state,
            local_addr: Mutex::new(None),
            serve_task: OnceCell::new(),
            exit_waiter: OnceCell::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn limiter(&self) -> &Arc<ConnectionLimiter> {
        &self.limiter
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Successful binds so far; grows by one on every re-bind.
    pub fn serve_cycles(&self) -> usize {
        self.serve_cycles.load(Ordering::SeqCst)
    }

    /// Address of the socket bound in the current or last serving cycle.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Spawn the serve loop and the shutdown waiter. Calling this again is
    /// harmless: both tasks are registered once per listener.
    pub fn start(self: &Arc<Self>, router: Router) {
        self.serve_task
            .get_or_init(|| tokio::spawn(Arc::clone(self).run(router)));
        self.exit_waiter
            .get_or_init(|| tokio::spawn(Arc::clone(self).wait_exit()));
    }

    /// Resolves once the listener reached `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ListenerState::Closed).await;
    }

    /// Serving address once the listener is bound.
    pub async fn serving(&self) -> Option<SocketAddr> {
        let mut rx = self.state.subscribe();
        let reached = rx
            .wait_for(|state| matches!(state, ListenerState::Serving | ListenerState::Closed))
            .await
            .map(|state| *state)
            .ok()?;
        match reached {
            ListenerState::Serving => self.local_addr(),
            _ => None,
        }
    }

    /// End the current serving cycle without a shutdown signal. The serve
    /// loop drains it and binds again.
    pub fn rebind(&self) {
        if let Some(cycle) = self.cycle.lock().as_ref() {
            info!(listener = %self.name, "serving cycle ended, re-binding");
            cycle.cancel();
        }
    }

    /// Stop the serve loop and cut off every in-flight connection.
    pub fn abort(&self) {
        self.force.cancel();
        if let Some(task) = self.serve_task.get() {
            task.abort();
        }
        self.limiter.close();
        self.set_state(ListenerState::Closed);
    }

    fn set_state(&self, state: ListenerState) {
        self.state.send_if_modified(|current| {
            // Closed is terminal.
            if *current == state || *current == ListenerState::Closed {
                return false;
            }
            *current = state;
            true
        });
    }

    async fn run(self: Arc<Self>, router: Router) {
        let mut backoff = Backoff::new();
        let app = router.layer(middleware::from_fn_with_state(self.force.clone(), cut_off_on_force));

        while !self.shutdown.is_cancelled() {
            self.set_state(ListenerState::Unbound);

            let listener = match TcpListener::bind(&self.addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    let delay = backoff.next_delay();
                    self.set_state(ListenerState::Backoff);
                    error!(listener = %self.name, addr = %self.addr, error = %e, retry_in = ?delay, "bind failed");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            };

            backoff.reset();
            let local_addr = listener.local_addr().ok();
            *self.local_addr.lock() = local_addr;

            // Cancelled by shutdown, by `rebind` or by a broken accept loop.
            let cycle = self.shutdown.child_token();
            *self.cycle.lock() = Some(cycle.clone());
            let admitted = AdmittedListener::new(
                listener,
                Arc::clone(&self.limiter),
                self.tls.clone(),
                cycle.clone(),
                self.force.clone(),
            );

            self.serve_cycles.fetch_add(1, Ordering::SeqCst);
            self.set_state(ListenerState::Serving);
            info!(listener = %self.name, addr = ?local_addr, tls = self.is_tls(), "server ready");

            let result = axum::serve(admitted, app.clone())
                .with_graceful_shutdown(cycle.cancelled_owned())
                .await;
            match result {
                Ok(()) => warn!(listener = %self.name, "serve loop exited"),
                Err(e) => error!(listener = %self.name, error = %e, "serve loop failed"),
            }
        }

        self.set_state(ListenerState::Closed);
        info!(listener = %self.name, "listener closed");
    }

    async fn wait_exit(self: Arc<Self>) {
        self.shutdown.cancelled().await;
        info!(listener = %self.name, "shutdown signal received, closing admission");
        self.limiter.close();
    }
}

/// Races every request against the force-close signal.
async fn cut_off_on_force(State(force): State<CancellationToken>, request: Request, next: Next) -> Response {
    tokio::select! {
        response = next.run(request) => response,
        _ = force.cancelled() => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONNECTION, "close")],
            "server shutting down",
        )
            .into_response(),
    }
}

/// `:port` binds every interface.
fn normalize_addr(addr: &str) -> Result<String, GatewayError> {
    let addr = addr.trim();
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| GatewayError::InvalidAddress(addr.to_string()))?;
    if port.parse::<u16>().is_err() {
        return Err(GatewayError::InvalidAddress(addr.to_string()));
    }
    if host.is_empty() {
        return Ok(format!("0.0.0.0:{}", port));
    }
    Ok(addr.to_string())
}

// ========================================
// ADMITTED LISTENER
// ========================================

/// axum listener that takes an admission token before every accept and
/// finishes TLS handshakes off the accept path.
pub struct AdmittedListener {
    inner: TcpListener,
    limiter: Arc<ConnectionLimiter>,
    tls: Option<TlsAcceptor>,
    handshakes: JoinSet<io::Result<(AdmittedStream, SocketAddr)>>,
    /// Cancelled when accepting fails for good, ending this serve cycle.
    cycle: CancellationToken,
    force: CancellationToken,
}

impl AdmittedListener {
    pub fn new(
        inner: TcpListener,
        limiter: Arc<ConnectionLimiter>,
        tls: Option<TlsAcceptor>,
        cycle: CancellationToken,
        force: CancellationToken,
    ) -> Self {
        Self {
            inner,
            limiter,
            tls,
            handshakes: JoinSet::new(),
            cycle,
            force,
        }
    }
}

impl Listener for AdmittedListener {
    type Io = AdmittedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            tokio::select! {
                Some(done) = self.handshakes.join_next(), if !self.handshakes.is_empty() => {
                    match done {
                        Ok(Ok(conn)) => return conn,
                        Ok(Err(e)) => debug!(error = %e, "TLS handshake failed"),
                        Err(e) => warn!(error = %e, "TLS handshake task failed"),
                    }
                }
                accepted = admit(&self.inner, &self.limiter, &self.cycle) => {
                    let (stream, addr, token) = accepted;
                    let force = self.force.clone();
                    let Some(acceptor) = self.tls.clone() else {
                        return (AdmittedStream::new(Io::Plain(stream), token, force), addr);
                    };
                    self.handshakes.spawn(async move {
                        let tls = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream))
                            .await
                            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))??;
                        Ok((AdmittedStream::new(Io::Tls(Box::new(tls)), token, force), addr))
                    });
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// Token first, then the socket. Never returns once the limiter is closed
/// or the listener is broken; the serve loop is stopped through `cycle`.
async fn admit(
    listener: &TcpListener,
    limiter: &ConnectionLimiter,
    cycle: &CancellationToken,
) -> (TcpStream, SocketAddr, AdmissionToken) {
    loop {
        let token = match limiter.acquire().await {
            Ok(token) => token,
            Err(_) => return std::future::pending().await,
        };

        match listener.accept().await {
            Ok((stream, addr)) => {
                let _ = stream.set_nodelay(true);
                token.attach();
                return (stream, addr, token);
            }
            Err(e) if is_connection_error(&e) => {
                debug!(error = %e, "connection dropped before accept");
            }
            Err(e) => {
                error!(error = %e, "accept failed, restarting listener");
                cycle.cancel();
                return std::future::pending().await;
            }
        }
    }
}

/// Per-connection failures that say nothing about the listening socket.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

// ========================================
// ADMITTED STREAM
// ========================================

pub enum Io {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// A connection together with its admission token. Dropping the stream,
/// whichever side closed it, releases the token. Once the listener is
/// force-closed every read, write and flush fails.
pub struct AdmittedStream {
    io: Io,
    token: AdmissionToken,
    forced: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl AdmittedStream {
    fn new(io: Io, token: AdmissionToken, force: CancellationToken) -> Self {
        Self {
            io,
            token,
            forced: Box::pin(force.cancelled_owned()),
        }
    }

    pub fn token(&self) -> &AdmissionToken {
        &self.token
    }

    fn check_forced(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if self.forced.as_mut().poll(cx).is_ready() {
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "listener force-closed"));
        }
        Ok(())
    }
}

impl AsyncRead for AdmittedStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check_forced(cx) {
            return Poll::Ready(Err(e));
        }
        match &mut this.io {
            Io::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Io::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AdmittedStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.check_forced(cx) {
            return Poll::Ready(Err(e));
        }
        match &mut this.io {
            Io::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Io::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.check_forced(cx) {
            return Poll::Ready(Err(e));
        }
        match &mut this.io {
            Io::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            Io::Tls(s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match &self.io {
            Io::Plain(s) => s.is_write_vectored(),
            Io::Tls(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check_forced(cx) {
            return Poll::Ready(Err(e));
        }
        match &mut this.io {
            Io::Plain(s) => Pin::new(s).poll_flush(cx),
            Io::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().io {
            Io::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Io::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_only_binds_all_interfaces() {
        assert_eq!(normalize_addr(":9191").unwrap(), "0.0.0.0:9191");
        assert_eq!(normalize_addr("127.0.0.1:0").unwrap(), "127.0.0.1:0");
        assert_eq!(normalize_addr("[::1]:8080").unwrap(), "[::1]:8080");
    }

    #[test]
    fn bad_address_syntax_is_rejected() {
        for addr in ["localhost", "host:http", ":99999", ""] {
            assert!(
                matches!(normalize_addr(addr), Err(GatewayError::InvalidAddress(_))),
                "{addr} should be rejected"
            );
        }
    }
}
