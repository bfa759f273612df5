//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! start_server(host, port, cert?, key?)
//!     → listener.rs (bind)
//!     → tls.rs (optional rustls config)
//!     → HTTP layer accepts connections
//!
//! Per request:
//!     → slots.rs (take a connection slot or reject)
//!     → connection.rs (track WebSocket sessions for shutdown)
//! ```
//!
//! # Design Decisions
//! - Saturation rejects immediately; nothing queues for a slot
//! - Each WebSocket session is tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod slots;
pub mod tls;

pub use connection::{ConnectionTracker, SessionGuard, SessionId};
pub use slots::{ConnectionPermit, ConnectionSlots};
