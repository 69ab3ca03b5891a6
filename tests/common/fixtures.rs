//! Test fixtures and builder patterns for admitted objects and reviews.

use std::collections::BTreeMap;

use namespace_webhook::StaticNamespaces;
use serde_json::{Value, json};

/// Builder for generic Kubernetes object documents.
///
/// # Example
/// ```
/// let pod = ObjectBuilder::new("Pod", "api")
///     .namespace("checkout")
///     .label("app", "api")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct ObjectBuilder {
    api_version: String,
    kind: Option<String>,
    name: String,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    with_metadata: bool,
}

impl ObjectBuilder {
    /// Create a new builder for an object of the given kind and name.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: Some(kind.into()),
            name: name.into(),
            namespace: None,
            labels: BTreeMap::new(),
            with_metadata: true,
        }
    }

    /// A Namespace object
    pub fn namespace_object(name: impl Into<String>) -> Self {
        Self::new("Namespace", name)
    }

    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Set the namespace of the object.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a label to the object.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Drop the `kind` field.
    pub fn without_kind(mut self) -> Self {
        self.kind = None;
        self
    }

    /// Drop the `metadata` map.
    pub fn without_metadata(mut self) -> Self {
        self.with_metadata = false;
        self
    }

    /// Build the object as a JSON document.
    pub fn build(self) -> Value {
        let mut object = json!({ "apiVersion": self.api_version });
        if let Some(kind) = self.kind {
            object["kind"] = json!(kind);
        }
        if self.with_metadata {
            let mut metadata = json!({ "name": self.name });
            if let Some(namespace) = self.namespace {
                metadata["namespace"] = json!(namespace);
            }
            if !self.labels.is_empty() {
                metadata["labels"] = json!(self.labels);
            }
            object["metadata"] = metadata;
        }
        object
    }

    /// Build the object as a YAML document.
    pub fn build_yaml(self) -> serde_yaml::Value {
        serde_yaml::to_value(self.build()).unwrap_or(serde_yaml::Value::Null)
    }
}

/// Builder for `admission.k8s.io/v1` AdmissionReview request bodies.
#[derive(Clone, Debug)]
pub struct AdmissionReviewBuilder {
    uid: String,
    operation: String,
    namespace: Option<String>,
    object: Value,
}

impl AdmissionReviewBuilder {
    pub fn new(object: Value) -> Self {
        let namespace = object["metadata"]["namespace"].as_str().map(str::to_string);
        Self {
            uid: "705ab4f5-6393-11e8-b7cc-42010a800002".to_string(),
            operation: "CREATE".to_string(),
            namespace,
            object,
        }
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Override the request namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Build the review as a JSON document.
    pub fn build(self) -> Value {
        let kind = self.object["kind"].as_str().unwrap_or("Unknown").to_string();
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": self.uid,
                "kind": {"group": "", "version": "v1", "kind": kind},
                "resource": {
                    "group": "",
                    "version": "v1",
                    "resource": format!("{}s", kind.to_lowercase())
                },
                "operation": self.operation,
                "userInfo": {"username": "system:admin"},
                "dryRun": false,
                "namespace": self.namespace,
                "name": self.object["metadata"]["name"],
                "object": self.object,
            }
        })
    }
}

/// Namespaces shared by most tests:
/// - `checkout`: env=prod, team=payments
/// - `sandbox`: env=dev
/// - `bare`: no labels
pub fn test_namespaces() -> StaticNamespaces {
    StaticNamespaces::new()
        .with_namespace("checkout", [("env", "prod"), ("team", "payments")])
        .with_namespace("sandbox", [("env", "dev")])
        .with_namespace("bare", Vec::<(String, String)>::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let object = ObjectBuilder::new("Pod", "api").build();
        assert_eq!(object["kind"], "Pod");
        assert_eq!(object["metadata"]["name"], "api");
        assert!(object["metadata"].get("namespace").is_none());
    }

    #[test]
    fn test_review_builder_takes_object_namespace() {
        let pod = ObjectBuilder::new("Pod", "api").namespace("checkout").build();
        let review = AdmissionReviewBuilder::new(pod).build();
        assert_eq!(review["request"]["namespace"], "checkout");
        assert_eq!(review["request"]["resource"]["resource"], "pods");
    }
}
