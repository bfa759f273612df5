//! TLS configuration and certificate loading.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::error::ProxyError;

/// Select the process-wide rustls crypto provider.
///
/// Both the listener and the upstream WebSocket client build rustls configs
/// from the default provider, which is ambiguous when more than one backend
/// is compiled in. Installing twice is harmless.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, ProxyError> {
    if !cert_path.exists() {
        return Err(ProxyError::TlsConfiguration(format!(
            "certificate file not found: {}",
            cert_path.display()
        )));
    }
    if !key_path.exists() {
        return Err(ProxyError::TlsConfiguration(format!(
            "private key file not found: {}",
            key_path.display()
        )));
    }

    install_crypto_provider();

    RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| ProxyError::TlsConfiguration(e.to_string()))
}
