//! namespace-webhook - namespace selector matching as a mutating admission webhook.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the Kubernetes client and the namespace cache
//! - Loads the rules and registers one webhook endpoint per rule
//! - Starts the webhook server and the health server

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use namespace_webhook::health::{HealthState, run_health_server};
use namespace_webhook::webhooks::server::serve_exit_error;
use namespace_webhook::{
    BootstrapError, NamespaceCache, NamespaceSelectorHandler, WebhookConfig, WebhookServer,
    load_rules,
};

/// Grace period for in-flight admission requests to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("namespace_webhook=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting namespace-webhook");

    let config = WebhookConfig::from_env()?;
    info!(
        namespace = %config.namespace,
        service = %config.service_host(),
        port = config.port,
        "Loaded configuration"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately so liveness probes work during bootstrap
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let (namespaces, watcher_handle) = NamespaceCache::spawn(client.clone(), config.api_timeout);

    let rules = load_rules(&config.rules_path).await?;
    info!(path = %config.rules_path, count = rules.len(), "Loaded rules");

    let handler = NamespaceSelectorHandler::new(namespaces, Some(health_state.clone()));
    let cert_path = config.cert_path.clone();
    let key_path = config.key_path.clone();

    let webhook_handle =
        match bootstrap(config, client, handler, rules, &cert_path, &key_path).await {
            Ok(handle) => handle,
            Err(e) => fatal(e),
        };

    // start() returns once the listener is bound
    health_state.set_ready(true).await;
    info!("Webhook server ready");

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = webhook_handle => {
            // the serve task never ends on its own
            fatal(serve_exit_error(result))
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = watcher_handle => {
            if let Err(e) = result {
                error!("Namespace watcher task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the API server stops sending requests
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight admission requests to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Webhook stopped");
    Ok(())
}

/// Fetch the client CA, register every rule and start serving.
async fn bootstrap(
    config: WebhookConfig,
    client: Client,
    handler: NamespaceSelectorHandler<NamespaceCache>,
    rules: Vec<namespace_webhook::Rule>,
    cert_path: &str,
    key_path: &str,
) -> Result<tokio::task::JoinHandle<Result<(), BootstrapError>>, BootstrapError> {
    let mut server = WebhookServer::new(config, client, handler).await?;
    for rule in rules {
        server.register_rule(rule)?;
    }
    server.start(cert_path, key_path).await
}

/// Log a bootstrap failure and exit so Kubernetes restarts the pod
#[allow(clippy::exit)]
fn fatal(e: BootstrapError) -> ! {
    error!(error = %e, "Fatal webhook error");
    std::process::exit(1);
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
