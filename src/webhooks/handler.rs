//! Admission review handling.
//!
//! [`AdmissionHandler`] is what the webhook server dispatches to: it learns the
//! rule behind each path at registration time and answers reviews sent to those
//! paths. [`NamespaceSelectorHandler`] is the handler used by the binary; it
//! decides whether each rule applies to the admitted object by matching the
//! object's namespace against the rule's namespace selector.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info, warn};

use crate::health::HealthState;
use crate::matching::{MatchError, NamespaceMatcher};
use crate::namespaces::NamespaceSource;
use crate::rules::Rule;

/// Per-path admission handling used by the webhook server.
pub trait AdmissionHandler: Send + Sync + 'static {
    /// Associate a rule with the endpoint path it is served on
    fn add_rule(&mut self, path: &str, rule: Rule);

    /// Answer an admission review sent to `path`
    fn review(
        &self,
        path: &str,
        review: AdmissionReview<DynamicObject>,
    ) -> impl Future<Output = AdmissionReview<DynamicObject>> + Send;
}

/// Outcome of evaluating a rule against an admission request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The object's namespace satisfies the rule's selector
    Matched,
    /// The rule does not apply to the object
    NotMatched,
    /// DELETE requests carry no object to match
    Skipped,
    /// The object could not be matched
    Denied,
    /// The review itself was malformed
    Invalid,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Matched => "matched",
            Outcome::NotMatched => "not_matched",
            Outcome::Skipped => "skipped",
            Outcome::Denied => "denied",
            Outcome::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Create a denial response with reason embedded in message.
/// kube-rs deny() only sets status.message, so we format as "[reason] message"
fn deny_with_reason(
    request: &AdmissionRequest<DynamicObject>,
    message: &str,
    reason: &str,
) -> AdmissionReview<DynamicObject> {
    AdmissionResponse::from(request)
        .deny(format!("[{}] {}", reason, message))
        .into_review()
}

/// Admission reason for a match failure
fn denial_reason(err: &MatchError) -> &'static str {
    match err {
        MatchError::MissingMetadata | MatchError::MissingKind | MatchError::Document(_) => {
            "InvalidObject"
        }
        MatchError::Lookup(_) => "NamespaceLookupFailed",
        MatchError::InvalidSelector { .. } => "InvalidSelector",
    }
}

/// Denial carrying the match error verbatim
fn deny_match_error(
    request: &AdmissionRequest<DynamicObject>,
    err: &MatchError,
) -> AdmissionReview<DynamicObject> {
    deny_with_reason(request, &err.to_string(), denial_reason(err))
}

/// Handler that evaluates each rule's namespace selector.
///
/// Objects are always admitted unchanged when the match succeeds; whether the
/// rule matched is logged and counted. Requests that cannot be matched (a
/// malformed object, a failed namespace lookup, a broken selector) are denied
/// so the failure surfaces to the client instead of silently skipping the rule.
pub struct NamespaceSelectorHandler<N> {
    matcher: NamespaceMatcher<N>,
    rules: BTreeMap<String, Rule>,
    health_state: Option<Arc<HealthState>>,
}

impl<N: NamespaceSource> NamespaceSelectorHandler<N> {
    pub fn new(namespaces: N, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            matcher: NamespaceMatcher::new(namespaces),
            rules: BTreeMap::new(),
            health_state,
        }
    }

    /// Rule registered for a path
    pub fn rule(&self, path: &str) -> Option<&Rule> {
        self.rules.get(path)
    }

    /// Decide whether `rule` applies to the object of `request`.
    pub async fn evaluate(
        &self,
        rule: &Rule,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Outcome, MatchError> {
        let Some(object) = request.object.as_ref() else {
            return Ok(Outcome::Skipped);
        };
        let Some(selector) = rule.namespace_selector.as_deref() else {
            return Ok(Outcome::Matched);
        };

        let document = admission_document(object, request.namespace.as_deref())?;
        let started = Instant::now();
        let result = self.matcher.matches(&document, selector).await;
        if let Some(state) = &self.health_state {
            state
                .metrics
                .observe_match(&rule.name, started.elapsed().as_secs_f64());
        }

        Ok(if result? {
            Outcome::Matched
        } else {
            Outcome::NotMatched
        })
    }

    fn record(&self, rule: &str, outcome: Outcome) {
        if let Some(state) = &self.health_state {
            state.metrics.record_admission(rule, outcome.as_str());
        }
    }
}

impl<N: NamespaceSource + 'static> AdmissionHandler for NamespaceSelectorHandler<N> {
    fn add_rule(&mut self, path: &str, rule: Rule) {
        if let Some(state) = &self.health_state {
            state.metrics.inc_rules();
        }
        self.rules.insert(path.to_string(), rule);
    }

    async fn review(
        &self,
        path: &str,
        review: AdmissionReview<DynamicObject>,
    ) -> AdmissionReview<DynamicObject> {
        let request: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(req) => req,
            Err(e) => {
                error!(path = %path, error = %e, "Failed to extract admission request");
                self.record(path, Outcome::Invalid);
                return AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                    .into_review();
            }
        };

        let uid = &request.uid;
        let Some(rule) = self.rules.get(path) else {
            // the server only routes registered paths
            error!(uid = %uid, path = %path, "No rule registered for path");
            self.record(path, Outcome::Invalid);
            return deny_with_reason(
                &request,
                "no rule registered for this endpoint",
                "UnknownRule",
            );
        };

        debug!(
            uid = %uid,
            rule = %rule.name,
            operation = ?request.operation,
            namespace = ?request.namespace,
            name = ?request.name,
            "Processing admission request"
        );

        if request.operation == Operation::Delete {
            info!(uid = %uid, rule = %rule.name, "Admission request allowed (DELETE)");
            self.record(&rule.name, Outcome::Skipped);
            return AdmissionResponse::from(&request).into_review();
        }

        match self.evaluate(rule, &request).await {
            Ok(outcome) => {
                info!(
                    uid = %uid,
                    rule = %rule.name,
                    outcome = %outcome,
                    "Admission request allowed"
                );
                self.record(&rule.name, outcome);
                AdmissionResponse::from(&request).into_review()
            }
            Err(e) => {
                warn!(
                    uid = %uid,
                    rule = %rule.name,
                    reason = %denial_reason(&e),
                    error = %e,
                    "Admission request denied"
                );
                self.record(&rule.name, Outcome::Denied);
                deny_match_error(&request, &e)
            }
        }
    }
}

/// Generic JSON document for an admitted object.
///
/// Objects created through `generateName` or by controllers may omit
/// `metadata.namespace`; the request namespace is filled in for those.
pub fn admission_document(
    object: &DynamicObject,
    request_namespace: Option<&str>,
) -> Result<serde_json::Value, serde_json::Error> {
    let mut document = serde_json::to_value(object)?;

    if let (Some(namespace), Some(metadata)) = (
        request_namespace.filter(|ns| !ns.is_empty()),
        document
            .get_mut("metadata")
            .and_then(serde_json::Value::as_object_mut),
    ) {
        metadata
            .entry("namespace")
            .or_insert_with(|| serde_json::Value::String(namespace.to_string()));
    }
    Ok(document)
}
