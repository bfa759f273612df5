//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve and bind the configured host and port
//! - Hand a non-blocking std listener to the HTTP server

use std::net::TcpListener;

use crate::error::ProxyError;

/// Bind `host:port`, resolving host names.
///
/// Binding happens synchronously so bind errors surface from `start_server`
/// instead of from the background serve task.
pub fn bind(host: &str, port: u16) -> Result<TcpListener, ProxyError> {
    let addr = format!("{}:{}", host, port);
    let bind_error = |source| ProxyError::Bind {
        addr: addr.clone(),
        source,
    };

    let listener = TcpListener::bind((host, port)).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;

    tracing::info!(
        address = %listener.local_addr().map_err(bind_error)?,
        "Listener bound"
    );

    Ok(listener)
}
