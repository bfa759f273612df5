//! Single-target reverse proxy library.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::{ProxyConfig, ServerConfig};
pub use error::ProxyError;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
