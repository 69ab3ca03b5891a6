//! Namespace cache and matcher against a live API server.

use std::time::Duration;

use namespace_webhook::{NamespaceCache, NamespaceMatcher, NamespaceSource};

use crate::client;
use crate::common::fixtures::ObjectBuilder;
use crate::namespace::TestNamespace;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_lookup_fresh_namespace() {
    let client = client().await;
    let ns = TestNamespace::create(client.clone(), "nswh-lookup", &[("env", "prod")]).await;

    // a brand new namespace may not be in the store yet; the live fallback covers it
    let (cache, watcher) = NamespaceCache::spawn(client, LOOKUP_TIMEOUT);
    let found = cache.lookup_namespace(ns.name()).await.unwrap();
    assert_eq!(found.name, ns.name());
    assert_eq!(found.labels.get("env").map(String::as_str), Some("prod"));
    watcher.abort();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_lookup_missing_namespace() {
    let client = client().await;
    let (cache, watcher) = NamespaceCache::spawn(client, LOOKUP_TIMEOUT);
    let err = cache
        .lookup_namespace("nswh-does-not-exist-7f3a")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    watcher.abort();
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires Kubernetes cluster"]
async fn test_matcher_sees_label_changes() {
    let client = client().await;
    let ns = TestNamespace::create(client.clone(), "nswh-relabel", &[("env", "dev")]).await;
    let (cache, watcher) = NamespaceCache::spawn(client, LOOKUP_TIMEOUT);
    let matcher = NamespaceMatcher::new(cache);
    let pod = ObjectBuilder::new("Pod", "api").namespace(ns.name()).build();

    assert!(!matcher.matches(&pod, "env=prod").await.unwrap());

    ns.set_label("env", "prod").await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        if matcher.matches(&pod, "env=prod").await.unwrap() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "namespace label change never reached the cache"
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    watcher.abort();
}
