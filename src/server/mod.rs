pub mod admin;
pub mod backoff;
pub mod gateway;
pub mod limiter;
pub mod listener;
pub mod registry;
pub mod tls;

pub use gateway::{GatewayOptions, GatewayServer, GatewayStatus};
pub use limiter::{AdmissionToken, ConnectionLimiter};
pub use listener::{ListenerState, ResilientListener};
