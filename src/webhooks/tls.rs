//! TLS material for the webhook server.
//!
//! The API server authenticates to webhooks with a client certificate signed by
//! the request-header CA published in the `extension-apiserver-authentication`
//! ConfigMap. That CA is fetched at startup and kept as a [`RootCertStore`].
//! The serving certificate and key are read from PEM files.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{RootCertStore, ServerConfig};
use tracing::{debug, info};

use super::server::BootstrapError;

/// Namespace holding cluster system configuration
pub const SYSTEM_NAMESPACE: &str = "kube-system";
/// ConfigMap publishing the API server's authentication settings
pub const AUTHENTICATION_CONFIG_MAP: &str = "extension-apiserver-authentication";
/// Key of the request-header client CA bundle
pub const CLIENT_CA_KEY: &str = "requestheader-client-ca-file";

/// Fetch the API server request-header client CA bundle (PEM).
pub async fn fetch_client_ca(client: Client, timeout: Duration) -> Result<String, BootstrapError> {
    debug!(
        namespace = SYSTEM_NAMESPACE,
        name = AUTHENTICATION_CONFIG_MAP,
        "Fetching API server client CA"
    );
    let api: Api<ConfigMap> = Api::namespaced(client, SYSTEM_NAMESPACE);
    let config_map = tokio::time::timeout(timeout, api.get(AUTHENTICATION_CONFIG_MAP))
        .await
        .map_err(|_| BootstrapError::ClientCaTimeout(timeout))?
        .map_err(BootstrapError::ClientCaFetch)?;
    client_ca_from_config_map(&config_map)
}

/// Extract the client CA bundle from the authentication ConfigMap.
pub fn client_ca_from_config_map(config_map: &ConfigMap) -> Result<String, BootstrapError> {
    let pem = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(CLIENT_CA_KEY))
        .ok_or_else(|| {
            let keys = config_map
                .data
                .as_ref()
                .map(|data| data.keys().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            BootstrapError::MissingClientCa(format!(
                "{CLIENT_CA_KEY} not found in ConfigMap \
                 {SYSTEM_NAMESPACE}/{AUTHENTICATION_CONFIG_MAP} (keys: [{keys}])"
            ))
        })?;
    info!("API server client CA loaded");
    Ok(pem.clone())
}

/// Build a certificate store from a PEM bundle.
///
/// Fails if the bundle holds no certificate at all.
pub fn client_ca_store(pem: &str) -> Result<RootCertStore, BootstrapError> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BootstrapError::InvalidClientCa(e.to_string()))?;

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    if added == 0 {
        return Err(BootstrapError::InvalidClientCa(
            "bundle contains no usable certificate".to_string(),
        ));
    }
    debug!(added, ignored, "Client CA certificates parsed");
    Ok(store)
}

/// Build the serving TLS configuration.
///
/// Client certificates are not requested; callers are authenticated by the
/// API server's webhook invocation, not re-verified here.
pub fn server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, BootstrapError> {
    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| BootstrapError::TlsConfig(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| BootstrapError::TlsConfig(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Load a PEM certificate chain and private key from disk.
pub async fn load_key_pair(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), BootstrapError> {
    let read = |path: &Path| {
        let path = path.to_path_buf();
        async move {
            tokio::fs::read(&path).await.map_err(|e| {
                BootstrapError::TlsConfig(format!("failed to read {}: {}", path.display(), e))
            })
        }
    };
    let cert_pem = read(cert_path).await?;
    let key_pem = read(key_path).await?;
    parse_key_pair(&cert_pem, &key_pem)
}

/// Read the CA certificate that signed the serving certificate.
///
/// The bytes are kept verbatim; they must hold at least one PEM certificate.
pub async fn load_ca_cert(path: &Path) -> Result<Vec<u8>, BootstrapError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        BootstrapError::TlsConfig(format!("failed to read {}: {}", path.display(), e))
    })?;
    let has_cert = rustls_pemfile::certs(&mut bytes.as_slice()).any(|cert| cert.is_ok());
    if !has_cert {
        return Err(BootstrapError::TlsConfig(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(bytes)
}

/// Parse a PEM certificate chain and private key.
pub fn parse_key_pair(
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), BootstrapError> {
    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BootstrapError::TlsConfig(format!("failed to parse certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(BootstrapError::TlsConfig(
            "no certificate found in PEM".to_string(),
        ));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| BootstrapError::TlsConfig(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| BootstrapError::TlsConfig("no private key found in PEM".to_string()))?;

    Ok((certs, key))
}
