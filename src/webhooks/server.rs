//! Admission webhook server.
//!
//! Every rule is served on its own HTTPS endpoint, `/rules/<encoded rule name>`,
//! so the API server can be pointed at exactly the rules a
//! MutatingWebhookConfiguration entry should run. All endpoints share one
//! [`AdmissionHandler`], which receives the matched path with each review.
//!
//! Lifecycle: [`WebhookServer::new`] fetches the API server client CA and fails
//! hard if it cannot; rules are registered with
//! [`WebhookServer::register_rule`]; [`WebhookServer::start`] consumes the
//! server and spawns the serve loop.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{MatchedPath, State};
use axum::routing::post;
use axum::{Json, Router};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use kube::Client;
use kube::core::DynamicObject;
use kube::core::admission::AdmissionReview;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rustls::RootCertStore;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info};

use super::handler::AdmissionHandler;
use super::tls;
use crate::config::WebhookConfig;
use crate::rules::Rule;

/// Prefix of every rule endpoint
pub const PATH_PREFIX: &str = "/rules/";

/// Bytes left unescaped in a path segment: RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Unrecoverable webhook startup failures.
///
/// The webhook must not serve admission requests without its trust
/// configuration or with an ambiguous routing table, so callers are expected
/// to stop the process on any of these.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The authentication ConfigMap could not be read
    #[error("failed to read the extension-apiserver-authentication ConfigMap: {0}")]
    ClientCaFetch(#[source] kube::Error),

    /// Reading the authentication ConfigMap took too long
    #[error("timed out after {0:?} reading the extension-apiserver-authentication ConfigMap")]
    ClientCaTimeout(Duration),

    /// The ConfigMap has no client CA bundle
    #[error("client CA bundle missing: {0}")]
    MissingClientCa(String),

    /// The client CA bundle holds no usable certificate
    #[error("invalid client CA bundle: {0}")]
    InvalidClientCa(String),

    /// The rule name cannot be turned into an endpoint
    #[error("invalid rule name {0:?}")]
    InvalidRuleName(String),

    /// Two rules map to the same endpoint
    #[error("rule {name:?} collides with already registered path {path}")]
    DuplicateRule { name: String, path: String },

    /// Serving certificate or TLS settings are unusable
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// The listener failed to bind or stopped serving
    #[error("webhook server error: {0}")]
    Server(String),
}

/// Endpoint path for a rule name
pub fn path_from_name(name: &str) -> String {
    let path = format!("{}{}", PATH_PREFIX, utf8_percent_encode(name, PATH_SEGMENT));
    debug!(rule = %name, path = %path, "Generated webhook path");
    path
}

/// TLS webhook server dispatching each rule path to a shared handler.
pub struct WebhookServer<H> {
    config: WebhookConfig,
    client_ca_pem: String,
    client_ca: Arc<RootCertStore>,
    /// CA that signed the serving certificate, published as the webhook caBundle
    ca_cert: Option<Vec<u8>>,
    handler: H,
    /// Registered path -> rule name
    routes: BTreeMap<String, String>,
}

impl<H: AdmissionHandler> WebhookServer<H> {
    /// Create the server, fetching the API server client CA from the cluster.
    pub async fn new(
        config: WebhookConfig,
        client: Client,
        handler: H,
    ) -> Result<Self, BootstrapError> {
        debug!(port = config.port, "Creating webhook server");
        let pem = tls::fetch_client_ca(client, config.api_timeout).await?;
        let ca_cert = match &config.ca_cert_path {
            Some(path) => Some(tls::load_ca_cert(Path::new(path)).await?),
            None => None,
        };
        let server = Self::with_client_ca(config, &pem, handler)?;
        Ok(match ca_cert {
            Some(ca_cert) => server.with_ca_cert(ca_cert),
            None => server,
        })
    }

    /// Create the server from an already known client CA bundle.
    pub fn with_client_ca(
        config: WebhookConfig,
        client_ca_pem: &str,
        handler: H,
    ) -> Result<Self, BootstrapError> {
        let client_ca = tls::client_ca_store(client_ca_pem)?;
        Ok(Self {
            config,
            client_ca_pem: client_ca_pem.to_string(),
            client_ca: Arc::new(client_ca),
            ca_cert: None,
            handler,
            routes: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// PEM bundle of the API server client CA
    pub fn client_ca_pem(&self) -> &str {
        &self.client_ca_pem
    }

    /// Parsed API server client CA, for client certificate verification
    pub fn client_ca(&self) -> Arc<RootCertStore> {
        self.client_ca.clone()
    }

    /// Set the CA certificate bytes of the serving certificate
    pub fn with_ca_cert(mut self, ca_cert: Vec<u8>) -> Self {
        self.ca_cert = Some(ca_cert);
        self
    }

    /// CA certificate bytes of the serving certificate, if configured
    pub fn ca_cert(&self) -> Option<&[u8]> {
        self.ca_cert.as_deref()
    }

    /// Registered endpoint paths
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Register a rule and return its endpoint path.
    ///
    /// Rule names that encode to an already registered path are rejected.
    pub fn register_rule(&mut self, rule: Rule) -> Result<String, BootstrapError> {
        if matches!(rule.name.as_str(), "" | "." | "..") {
            return Err(BootstrapError::InvalidRuleName(rule.name));
        }

        let path = path_from_name(&rule.name);
        if self.routes.contains_key(&path) {
            return Err(BootstrapError::DuplicateRule {
                name: rule.name,
                path,
            });
        }

        info!(rule = %rule.name, path = %path, "Registering webhook rule");
        self.routes.insert(path.clone(), rule.name.clone());
        self.handler.add_rule(&path, rule);
        Ok(path)
    }

    /// Build the router serving every registered rule path.
    pub fn into_router(self) -> Router {
        let handler = Arc::new(self.handler);
        self.routes
            .keys()
            .fold(Router::new(), |router, path| {
                router.route(path, post(dispatch::<H>))
            })
            .with_state(handler)
    }

    /// Start serving TLS on the configured port.
    ///
    /// Returns once the serve task is spawned and its listener is bound. The
    /// task only finishes if the listener fails; its result is a
    /// [`BootstrapError`].
    pub async fn start(
        self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<JoinHandle<Result<(), BootstrapError>>, BootstrapError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();
        debug!(
            cert_path = %cert_path.display(),
            key_path = %key_path.display(),
            "Starting webhook server"
        );

        let (chain, key) = tls::load_key_pair(cert_path, key_path).await?;
        let tls_config = RustlsConfig::from_config(Arc::new(tls::server_config(chain, key)?));

        let port = self.config.port;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let app = self.into_router();

        let server_handle = Handle::new();
        let serve_handle = server_handle.clone();
        let task = tokio::spawn(async move {
            axum_server::bind_rustls(addr, tls_config)
                .handle(serve_handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| {
                    error!(error = %e, "Webhook server failed");
                    BootstrapError::Server(e.to_string())
                })
        });

        match server_handle.listening().await {
            Some(bound) => {
                info!(port, addr = %bound, "Webhook server listening with TLS");
                Ok(task)
            }
            // the listener never came up; surface the task's error
            None => match task.await {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(BootstrapError::Server(
                    "webhook server stopped before listening".to_string(),
                )),
                Err(e) => Err(BootstrapError::Server(e.to_string())),
            },
        }
    }
}

/// Error describing why a serve task returned by [`WebhookServer::start`] ended.
///
/// The serve loop never finishes cleanly, so every outcome is an error.
pub fn serve_exit_error(result: Result<Result<(), BootstrapError>, JoinError>) -> BootstrapError {
    match result {
        Ok(Err(e)) => e,
        Ok(Ok(())) => BootstrapError::Server("webhook server stopped unexpectedly".to_string()),
        Err(e) => BootstrapError::Server(format!("webhook server task panicked: {}", e)),
    }
}

/// Route handler shared by all rule paths
async fn dispatch<H: AdmissionHandler>(
    State(handler): State<Arc<H>>,
    path: MatchedPath,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(handler.review(path.as_str(), review).await)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use kube::core::admission::{AdmissionRequest, AdmissionResponse};

    /// Handler that records registered rules and allows everything
    #[derive(Default)]
    struct RecordingHandler {
        rules: BTreeMap<String, Rule>,
    }

    impl AdmissionHandler for RecordingHandler {
        fn add_rule(&mut self, path: &str, rule: Rule) {
            self.rules.insert(path.to_string(), rule);
        }

        async fn review(
            &self,
            _path: &str,
            review: AdmissionReview<DynamicObject>,
        ) -> AdmissionReview<DynamicObject> {
            let request: Result<AdmissionRequest<DynamicObject>, _> = review.try_into();
            match request {
                Ok(request) => AdmissionResponse::from(&request).into_review(),
                Err(e) => AdmissionResponse::invalid(e.to_string()).into_review(),
            }
        }
    }

    fn ca_pem() -> String {
        rcgen::generate_simple_self_signed(vec!["kube-apiserver".to_string()])
            .unwrap()
            .cert
            .pem()
    }

    fn server() -> WebhookServer<RecordingHandler> {
        WebhookServer::with_client_ca(
            WebhookConfig::default(),
            &ca_pem(),
            RecordingHandler::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_path_from_name() {
        assert_eq!(path_from_name("env-prod"), "/rules/env-prod");
        assert_eq!(path_from_name("my rule"), "/rules/my%20rule");
        assert_eq!(path_from_name("a/b"), "/rules/a%2Fb");
        assert_eq!(path_from_name("a:b"), "/rules/a%3Ab");
        assert_eq!(path_from_name("ü"), "/rules/%C3%BC");
    }

    #[test]
    fn test_register_rule_records_path() {
        let mut server = server();
        let path = server
            .register_rule(Rule::new("env-prod").with_namespace_selector("env=prod"))
            .unwrap();
        assert_eq!(path, "/rules/env-prod");
        assert_eq!(server.paths().collect::<Vec<_>>(), vec!["/rules/env-prod"]);
        assert_eq!(
            server.handler.rules.get(&path).map(|r| r.name.as_str()),
            Some("env-prod")
        );
    }

    #[test]
    fn test_distinct_names_distinct_paths() {
        let mut server = server();
        let a = server.register_rule(Rule::new("my rule")).unwrap();
        let b = server.register_rule(Rule::new("my%20rule")).unwrap();
        let c = server.register_rule(Rule::new("my-rule")).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(server.paths().count(), 3);
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let mut server = server();
        server.register_rule(Rule::new("env-prod")).unwrap();
        let err = server
            .register_rule(Rule::new("env-prod").with_namespace_selector("env=prod"))
            .unwrap_err();
        assert!(matches!(err, BootstrapError::DuplicateRule { .. }));
        // the first registration is untouched
        assert_eq!(server.handler.rules.len(), 1);
        assert!(server.handler.rules["/rules/env-prod"].namespace_selector.is_none());
    }

    #[test]
    fn test_invalid_rule_names() {
        let mut server = server();
        for name in ["", ".", ".."] {
            assert!(matches!(
                server.register_rule(Rule::new(name)),
                Err(BootstrapError::InvalidRuleName(_))
            ));
        }
    }

    #[test]
    fn test_invalid_client_ca_is_fatal() {
        let result = WebhookServer::with_client_ca(
            WebhookConfig::default(),
            "garbage",
            RecordingHandler::default(),
        );
        assert!(matches!(result, Err(BootstrapError::InvalidClientCa(_))));
    }

    #[test]
    fn test_client_ca_retained() {
        let server = server();
        assert_eq!(server.client_ca().len(), 1);
        assert!(server.client_ca_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_ca_cert_retained() {
        let server = server();
        assert!(server.ca_cert().is_none());
        let server = server.with_ca_cert(ca_pem().into_bytes());
        assert!(server.ca_cert().unwrap().starts_with(b"-----BEGIN CERTIFICATE"));
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    /// CA certificate (PEM) plus a `localhost` serving key pair signed by it
    struct ServingCerts {
        ca_pem: String,
        cert_path: std::path::PathBuf,
        key_path: std::path::PathBuf,
    }

    async fn serving_certs(tag: &str) -> ServingCerts {
        use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let leaf = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .signed_by(&leaf_key, &ca, &ca_key)
            .unwrap();

        let dir = std::env::temp_dir();
        let cert_path = dir.join(format!("webhook-{}-{}.crt", tag, std::process::id()));
        let key_path = dir.join(format!("webhook-{}-{}.key", tag, std::process::id()));
        tokio::fs::write(&cert_path, leaf.pem()).await.unwrap();
        tokio::fs::write(&key_path, leaf_key.serialize_pem()).await.unwrap();

        ServingCerts {
            ca_pem: ca.pem(),
            cert_path,
            key_path,
        }
    }

    /// Blocking HTTPS POST trusting `ca_pem`; returns the raw HTTP response
    fn post_tls(port: u16, ca_pem: &str, path: &str, body: &str) -> String {
        use std::io::{Read, Write};

        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(
            rustls_pemfile::certs(&mut ca_pem.as_bytes()).map(|cert| cert.unwrap()),
        );
        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();

        let name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
        let connection = rustls::ClientConnection::new(Arc::new(config), name).unwrap();
        let tcp = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut stream = rustls::StreamOwned::new(connection, tcp);

        let request = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).unwrap();

        let mut response = Vec::new();
        // the peer may close without close_notify; keep whatever arrived
        let _ = stream.read_to_end(&mut response);
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_serves_rule_paths_over_tls() {
        let certs = serving_certs("start").await;
        let port = free_port();
        let config = WebhookConfig {
            port,
            ..WebhookConfig::default()
        };
        let mut server =
            WebhookServer::with_client_ca(config, &ca_pem(), RecordingHandler::default()).unwrap();
        server.register_rule(Rule::new("my rule")).unwrap();

        let handle = server.start(&certs.cert_path, &certs.key_path).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        let body = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "u",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "operation": "CREATE",
                "userInfo": {},
                "dryRun": false,
                "namespace": "default",
                "object": {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": {"name": "api", "namespace": "default"}
                }
            }
        })
        .to_string();

        let ca = certs.ca_pem.clone();
        let response = tokio::task::spawn_blocking(move || {
            post_tls(port, &ca, "/rules/my%20rule", &body)
        })
        .await
        .unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("\"allowed\":true"), "{response}");
        assert!(!handle.is_finished());

        handle.abort();
        let _ = tokio::fs::remove_file(&certs.cert_path).await;
        let _ = tokio::fs::remove_file(&certs.key_path).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_fails_when_port_taken() {
        let certs = serving_certs("taken").await;
        let listener = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let config = WebhookConfig {
            port: listener.local_addr().unwrap().port(),
            ..WebhookConfig::default()
        };
        let server =
            WebhookServer::with_client_ca(config, &ca_pem(), RecordingHandler::default()).unwrap();

        let result = server.start(&certs.cert_path, &certs.key_path).await;
        assert!(matches!(result, Err(BootstrapError::Server(_))));

        drop(listener);
        let _ = tokio::fs::remove_file(&certs.cert_path).await;
        let _ = tokio::fs::remove_file(&certs.key_path).await;
    }

    #[tokio::test]
    async fn test_serve_exit_is_always_an_error() {
        let stopped = serve_exit_error(Ok(Ok(())));
        assert!(stopped.to_string().contains("stopped unexpectedly"));

        let failed = serve_exit_error(Ok(Err(BootstrapError::Server("bind".to_string()))));
        assert!(matches!(failed, BootstrapError::Server(ref m) if m == "bind"));

        let task: JoinHandle<Result<(), BootstrapError>> = tokio::spawn(async { panic!("boom") });
        let panicked = serve_exit_error(task.await);
        assert!(panicked.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn test_start_without_certificates_fails() {
        let server = server();
        let result = server
            .start("/nonexistent/tls.crt", "/nonexistent/tls.key")
            .await;
        assert!(matches!(result, Err(BootstrapError::TlsConfig(_))));
    }
}
