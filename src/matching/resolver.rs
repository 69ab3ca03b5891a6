//! Decide whether an object's namespace satisfies a namespace selector.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use super::document::DynamicValue;
use super::labels::{has_labels, lookup_labels};
use super::selector::{LabelSelector, SelectorError, SelectorPrimitive};
use crate::namespaces::{NamespaceLookupError, NamespaceSource};

/// Kind of namespace objects
pub const NAMESPACE_KIND: &str = "Namespace";

/// Errors returned while matching an object against a namespace selector.
///
/// A selector that simply does not match is not an error; see
/// [`NamespaceMatcher::matches`].
#[derive(Error, Debug)]
pub enum MatchError {
    /// The object has no `metadata` map
    #[error("the object is missing metadata")]
    MissingMetadata,

    /// The object has no string `kind`
    #[error("the object has no kind")]
    MissingKind,

    /// The admitted object could not be converted into a document
    #[error("the object could not be read as a document: {0}")]
    Document(#[from] serde_json::Error),

    /// Namespace lookup failed; the cache error is passed through unchanged
    #[error(transparent)]
    Lookup(#[from] NamespaceLookupError),

    /// The selector string is malformed
    #[error("invalid label selector {selector:?}: {source}")]
    InvalidSelector {
        selector: String,
        #[source]
        source: SelectorError,
    },
}

impl MatchError {
    /// Whether the error points at a broken rule rather than at the object or cluster
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, MatchError::InvalidSelector { .. })
    }
}

/// Matches objects against namespace selectors using a namespace source for
/// label lookups.
#[derive(Clone, Debug)]
pub struct NamespaceMatcher<N, S = LabelSelector> {
    namespaces: N,
    selectors: S,
}

impl<N: NamespaceSource> NamespaceMatcher<N> {
    /// Create a matcher using the Kubernetes label-selector grammar
    pub fn new(namespaces: N) -> Self {
        Self::with_selectors(namespaces, LabelSelector)
    }
}

impl<N: NamespaceSource, S: SelectorPrimitive> NamespaceMatcher<N, S> {
    pub fn with_selectors(namespaces: N, selectors: S) -> Self {
        Self {
            namespaces,
            selectors,
        }
    }

    pub fn namespaces(&self) -> &N {
        &self.namespaces
    }

    /// Decide whether the namespace of `object` satisfies `selector`.
    ///
    /// Namespaces are matched on their own labels. Any other object is matched
    /// on the labels of the namespace named in `metadata.namespace`, which is
    /// looked up once through the namespace source. Cluster-scoped objects never
    /// match. Namespaces without labels can still match negative expressions
    /// such as `!key`.
    pub async fn matches(
        &self,
        object: &dyn DynamicValue,
        selector: &str,
    ) -> Result<bool, MatchError> {
        let object_map = object.as_map().ok_or(MatchError::MissingMetadata)?;
        let metadata = object_map
            .get("metadata")
            .filter(|m| m.as_map().is_some())
            .ok_or(MatchError::MissingMetadata)?;

        let namespace = metadata
            .as_map()
            .and_then(|m| m.get("namespace"))
            .and_then(|n| n.as_str())
            .unwrap_or_default();
        let kind = object_map
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or(MatchError::MissingKind)?;

        if namespace.is_empty() && kind != NAMESPACE_KIND {
            debug!(
                kind = %kind,
                selector = %selector,
                "Cluster-scoped object cannot match a namespace selector"
            );
            return Ok(false);
        }

        let labels = if kind == NAMESPACE_KIND {
            debug!(selector = %selector, "Object is a namespace, using its own labels");
            own_labels(object, metadata)
        } else {
            debug!(namespace = %namespace, selector = %selector, "Looking up namespace labels");
            self.namespaces.lookup_namespace(namespace).await?.labels
        };

        self.evaluate(selector, &labels)
    }

    /// Validate `selector` and evaluate it against a label set.
    pub fn evaluate(
        &self,
        selector: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<bool, MatchError> {
        let invalid = |source| MatchError::InvalidSelector {
            selector: selector.to_string(),
            source,
        };
        self.selectors.validate(selector).map_err(invalid)?;
        self.selectors.matches(selector, labels).map_err(invalid)
    }
}

/// Labels of a namespace document: `metadata.labels`, or top-level `labels`
/// when metadata carries none.
fn own_labels(object: &dyn DynamicValue, metadata: &dyn DynamicValue) -> BTreeMap<String, String> {
    if has_labels(metadata) {
        lookup_labels(metadata)
    } else {
        lookup_labels(object)
    }
}

/// Match with a one-off matcher built from a namespace source.
pub async fn object_namespace_matches<N: NamespaceSource>(
    object: &dyn DynamicValue,
    selector: &str,
    namespaces: &N,
) -> Result<bool, MatchError> {
    NamespaceMatcher::new(namespaces).matches(object, selector).await
}
