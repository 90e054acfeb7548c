//! Error types shared across the topology, lag and gateway layers.

use thiserror::Error;

/// Failure reading the coordination store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("node does not exist: {0}")]
    NoNode(String),

    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid data at {path}: {reason}")]
    InvalidData { path: String, reason: String },
}

/// Failure talking to the message queue for produced offsets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OffsetFetchError {
    #[error("cannot connect to brokers {brokers:?}: {reason}")]
    Connect { brokers: Vec<String>, reason: String },

    #[error("offset query for {topic}/{partition} failed: {reason}")]
    Fetch {
        topic: String,
        partition: i32,
        reason: String,
    },
}

/// Returned by an acquire that was cut short because the limiter closed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("connection limiter closed")]
pub struct LimiterClosed;

/// Certificate and key loading failures. Always fatal at startup.
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKeys(String),

    #[error("TLS configuration error: {0}")]
    Config(#[from] rustls::Error),
}

/// Configuration errors that stop the gateway from starting.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),

    #[error("certificate load failed: {0}")]
    Certificate(#[from] TlsError),

    #[error("gateway has no listener configured")]
    NoListener,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Topic creation rejected or not carried out by the cluster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicAdminError {
    #[error("invalid topic request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}
