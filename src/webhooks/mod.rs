//! Mutating admission webhook serving one endpoint per rule.
//!
//! - [`server`]: TLS server, rule registration and path dispatch
//! - [`handler`]: admission review handling behind each path
//! - [`tls`]: client CA bootstrap and serving certificates

pub mod handler;
pub mod server;
pub mod tls;

pub use handler::{AdmissionHandler, NamespaceSelectorHandler, Outcome, admission_document};
pub use server::{BootstrapError, PATH_PREFIX, WebhookServer, path_from_name};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
