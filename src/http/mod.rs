//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (slot, classify, dispatch)
//!     → forward.rs (plain HTTP relay)    | websocket.rs (upgrade + bridge)
//!     → headers.rs (prepare, strip, CORS)
//!     → response.rs (relay status/headers, preflight, errors)
//!     → Send to client
//! ```

pub mod forward;
pub mod headers;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::HttpForwarder;
pub use server::ProxyServer;
pub use websocket::WebSocketBridge;
