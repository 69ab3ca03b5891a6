//! RAII namespace management for isolated tests.
//!
//! IMPORTANT: Tests using TestNamespace must use `#[tokio::test(flavor = "multi_thread")]`
//! to support synchronous cleanup via `block_in_place`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use k8s_openapi::api::core::v1::Namespace;
use kube::Client;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use serde_json::json;
use uuid::Uuid;

/// A test namespace that is automatically deleted when dropped.
pub struct TestNamespace {
    client: Client,
    name: String,
    /// Track if cleanup has already been initiated
    cleanup_initiated: AtomicBool,
}

impl TestNamespace {
    /// Create a new namespace named `{prefix}-{uuid}` with the given labels.
    pub async fn create(client: Client, prefix: &str, labels: &[(&str, &str)]) -> Self {
        let suffix = Uuid::new_v4().to_string()[..8].to_string();
        let name = format!("{}-{}", prefix, suffix);

        let mut all_labels: BTreeMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        all_labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "integration-test".to_string(),
        );

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(all_labels),
                ..Default::default()
            },
            ..Default::default()
        };

        Api::<Namespace>::all(client.clone())
            .create(&PostParams::default(), &ns)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test namespace {}: {}", name, e));

        tracing::info!(namespace = %name, "Created test namespace");

        Self {
            client,
            name,
            cleanup_initiated: AtomicBool::new(false),
        }
    }

    /// Get the name of the test namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Merge-patch labels onto the namespace.
    pub async fn set_label(&self, key: &str, value: &str) {
        let patch: Patch<serde_json::Value> =
            Patch::Merge(json!({"metadata": {"labels": {key: value}}}));
        Api::<Namespace>::all(self.client.clone())
            .patch(&self.name, &PatchParams::default(), &patch)
            .await
            .unwrap_or_else(|e| panic!("Failed to label namespace {}: {}", self.name, e));
    }
}

/// Automatic cleanup on drop.
impl Drop for TestNamespace {
    fn drop(&mut self) {
        if self.cleanup_initiated.swap(true, Ordering::SeqCst) {
            return;
        }

        let name = self.name.clone();
        let client = self.client.clone();

        tokio::task::block_in_place(|| {
            let handle = tokio::runtime::Handle::current();
            handle.block_on(async {
                let ns_api: Api<Namespace> = Api::all(client);
                let dp = DeleteParams {
                    propagation_policy: Some(kube::api::PropagationPolicy::Background),
                    ..Default::default()
                };

                match ns_api.delete(&name, &dp).await {
                    Ok(_) => {
                        tracing::debug!("Drop: namespace {} deletion initiated", name);
                    }
                    Err(kube::Error::Api(e)) if e.code == 404 => {
                        tracing::debug!("Drop: namespace {} already deleted", name);
                    }
                    Err(e) => {
                        tracing::warn!("Drop: failed to delete namespace {}: {}", name, e);
                    }
                }
            });
        });
    }
}
