//! namespace-webhook library crate
//!
//! Decides whether an admitted object's namespace satisfies a label selector
//! and serves that decision as a Kubernetes mutating admission webhook with
//! one endpoint per rule.

pub mod config;
pub mod health;
pub mod matching;
pub mod namespaces;
pub mod rules;
pub mod webhooks;

pub use config::{ConfigError, WebhookConfig};
pub use health::HealthState;
pub use matching::{MatchError, NamespaceMatcher, object_namespace_matches};
pub use namespaces::{
    Namespace, NamespaceCache, NamespaceLookupError, NamespaceSource, StaticNamespaces,
};
pub use rules::{Rule, RulesError, load_rules, parse_rules};
pub use webhooks::{BootstrapError, NamespaceSelectorHandler, WebhookServer, path_from_name};
