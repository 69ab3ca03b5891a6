//! Namespace label lookups.
//!
//! The resolver needs the labels of the namespace that owns an object. Doing a
//! live API call for every admission request would put the API server on the
//! admission hot path, so [`NamespaceCache`] keeps a reflector store of all
//! namespaces warm and only falls back to a GET when the store has not seen a
//! namespace yet (e.g. right after startup, or a namespace created a moment
//! before the object that is being admitted).

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace as NamespaceResource;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Client};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Default timeout for live namespace lookups
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A namespace and its labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Namespace {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    fn from_resource(ns: &NamespaceResource) -> Self {
        Self {
            name: ns.metadata.name.clone().unwrap_or_default(),
            labels: ns.metadata.labels.clone().unwrap_or_default(),
        }
    }
}

/// Errors returned by namespace lookups
#[derive(Error, Debug)]
pub enum NamespaceLookupError {
    /// The namespace does not exist in the cluster
    #[error("namespace not found: {0}")]
    NotFound(String),

    /// The live lookup did not complete in time
    #[error("timed out after {timeout:?} looking up namespace {name}")]
    Timeout { name: String, timeout: Duration },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl NamespaceLookupError {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, NamespaceLookupError::NotFound(_))
            || matches!(self, NamespaceLookupError::Kube(kube::Error::Api(e)) if e.code == 404)
    }
}

/// Source of namespace labels, keyed by namespace name.
///
/// Implementations must be safe for concurrent reads; lookups are issued from
/// concurrently running admission requests.
pub trait NamespaceSource: Send + Sync {
    fn lookup_namespace(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Namespace, NamespaceLookupError>> + Send;
}

impl<N: NamespaceSource> NamespaceSource for &N {
    async fn lookup_namespace(&self, name: &str) -> Result<Namespace, NamespaceLookupError> {
        (**self).lookup_namespace(name).await
    }
}

/// Reflector-backed namespace cache with a live fallback.
#[derive(Clone)]
pub struct NamespaceCache {
    api: Api<NamespaceResource>,
    store: Store<NamespaceResource>,
    timeout: Duration,
}

impl NamespaceCache {
    /// Start watching all namespaces and return the cache together with the
    /// handle of the background watch task.
    ///
    /// The watch stream retries with the default backoff, so the task only
    /// ends when the runtime shuts down.
    pub fn spawn(client: Client, timeout: Duration) -> (Self, JoinHandle<()>) {
        let api: Api<NamespaceResource> = Api::all(client);
        let (store, writer) = reflector::store();

        let stream = reflector(
            writer,
            watcher(api.clone(), watcher::Config::default().any_semantic()),
        )
        .default_backoff()
        .touched_objects();

        let handle = tokio::spawn(async move {
            info!("Starting namespace watcher");
            stream
                .for_each(|event| async move {
                    match event {
                        Ok(ns) => debug!(namespace = ?ns.metadata.name, "Namespace cache updated"),
                        Err(e) => error!(error = %e, "Namespace watch error"),
                    }
                })
                .await;
            error!("Namespace watch stream ended unexpectedly");
        });

        (
            Self {
                api,
                store,
                timeout,
            },
            handle,
        )
    }

    /// Number of namespaces currently held by the store
    pub fn len(&self) -> usize {
        self.store.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn fetch(&self, name: &str) -> Result<Namespace, NamespaceLookupError> {
        let result = tokio::time::timeout(self.timeout, self.api.get_opt(name))
            .await
            .map_err(|_| NamespaceLookupError::Timeout {
                name: name.to_string(),
                timeout: self.timeout,
            })??;

        match result {
            Some(ns) => Ok(Namespace::from_resource(&ns)),
            None => Err(NamespaceLookupError::NotFound(name.to_string())),
        }
    }
}

impl NamespaceSource for NamespaceCache {
    async fn lookup_namespace(&self, name: &str) -> Result<Namespace, NamespaceLookupError> {
        if let Some(ns) = self.store.get(&ObjectRef::new(name)) {
            return Ok(Namespace::from_resource(&ns));
        }
        debug!(namespace = %name, "Namespace not in cache, fetching from API server");
        self.fetch(name).await
    }
}

/// Fixed set of namespaces, for tests and offline evaluation.
#[derive(Clone, Debug, Default)]
pub struct StaticNamespaces {
    namespaces: BTreeMap<String, Namespace>,
}

impl StaticNamespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a namespace with the given labels
    pub fn with_namespace<K, V>(
        mut self,
        name: &str,
        labels: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let labels = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.namespaces
            .insert(name.to_string(), Namespace::new(name, labels));
        self
    }
}

impl NamespaceSource for StaticNamespaces {
    async fn lookup_namespace(&self, name: &str) -> Result<Namespace, NamespaceLookupError> {
        self.namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| NamespaceLookupError::NotFound(name.to_string()))
    }
}
