//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + command line overrides
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → server.rs ServerConfig (validated, immutable)
//!     → shared via Arc with every handler of one server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server is built; there is no reload
//! - All file fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod server;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ListenerConfig, ProxyConfig, TlsConfig};
pub use server::{ServerConfig, ServerConfigBuilder};
