//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary calls ProxyServer::close
//!
//! Shutdown (shutdown.rs + http::server):
//!     Stop accepting → drain requests and sessions → force-close after grace
//! ```
//!
//! # Design Decisions
//! - Shutdown has a deadline: remaining sessions are forced closed
//! - One coordinator per server instance, no process-wide state

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
