// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the webhook request path.
//!
//! These tests drive the router returned by `WebhookServer::into_router` with
//! real AdmissionReview bodies, WITHOUT requiring a live Kubernetes cluster.
//! Namespaces come from a static source and the client CA from a generated
//! certificate.
//!
//! ```bash
//! cargo test --test functional
//! ```

#[path = "../common/mod.rs"]
mod common;
