// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for namespace-webhook.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#[path = "../common/mod.rs"]
mod common;

mod selector_tests {
    use namespace_webhook::matching::selector::parse_selector;
    use namespace_webhook::matching::{LabelSelector, SelectorPrimitive};
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_equality_forms() {
        let prod = labels(&[("env", "prod")]);
        for selector in ["env=prod", "env==prod", " env = prod "] {
            assert!(LabelSelector.matches(selector, &prod).unwrap(), "{selector}");
        }
        assert!(!LabelSelector.matches("env!=prod", &prod).unwrap());
    }

    #[test]
    fn test_set_based() {
        let web = labels(&[("tier", "web"), ("env", "prod")]);
        assert!(LabelSelector.matches("tier in (web, api)", &web).unwrap());
        assert!(!LabelSelector.matches("tier notin (web)", &web).unwrap());
        assert!(LabelSelector.matches("env,tier in (web),!legacy", &web).unwrap());
    }

    #[test]
    fn test_existence() {
        let bare = BTreeMap::new();
        assert!(LabelSelector.matches("!legacy", &bare).unwrap());
        assert!(!LabelSelector.matches("legacy", &bare).unwrap());
    }

    #[test]
    fn test_empty_selector_selects_everything() {
        assert!(parse_selector("").is_ok());
        assert!(LabelSelector.matches("", &BTreeMap::new()).unwrap());
        assert!(LabelSelector.matches("   ", &labels(&[("a", "b")])).unwrap());
    }

    #[test]
    fn test_malformed_selectors() {
        for selector in ["env in (", "env in prod)", "env=prod,", "=prod", "env=pr od", "a b (c)"] {
            assert!(LabelSelector.validate(selector).is_err(), "{selector}");
        }
    }

    #[test]
    fn test_prefixed_keys() {
        let set = labels(&[("app.kubernetes.io/part-of", "shop")]);
        assert!(LabelSelector.matches("app.kubernetes.io/part-of=shop", &set).unwrap());
        assert!(LabelSelector.validate("/part-of=shop").is_err());
    }
}

mod labels_tests {
    use namespace_webhook::matching::lookup_labels;
    use serde_json::json;

    #[test]
    fn test_json_and_yaml_agree() {
        let json_doc = json!({"labels": {"env": "prod", "team": "payments"}});
        let yaml_doc: serde_yaml::Value =
            serde_yaml::from_str("labels:\n  env: prod\n  team: payments\n").unwrap();
        assert_eq!(lookup_labels(&json_doc), lookup_labels(&yaml_doc));
        assert_eq!(lookup_labels(&json_doc).len(), 2);
    }

    #[test]
    fn test_non_string_entries_dropped() {
        let yaml_doc: serde_yaml::Value =
            serde_yaml::from_str("labels:\n  env: prod\n  replicas: 3\n  1: one\n").unwrap();
        let labels = lookup_labels(&yaml_doc);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels["env"], "prod");
    }

    #[test]
    fn test_missing_or_scalar_labels() {
        assert!(lookup_labels(&json!({"name": "x"})).is_empty());
        assert!(lookup_labels(&json!({"labels": "env=prod"})).is_empty());
        assert!(lookup_labels(&json!("not a map")).is_empty());
    }
}

mod resolver_tests {
    use crate::common::fixtures::{ObjectBuilder, test_namespaces};
    use namespace_webhook::matching::{MatchError, object_namespace_matches};
    use namespace_webhook::{NamespaceMatcher, StaticNamespaces};

    #[tokio::test]
    async fn test_namespaced_object_uses_its_namespace() {
        let matcher = NamespaceMatcher::new(test_namespaces());
        let pod = ObjectBuilder::new("Pod", "api").namespace("checkout").build();
        assert!(matcher.matches(&pod, "env=prod").await.unwrap());
        assert!(matcher.matches(&pod, "team in (payments)").await.unwrap());
        assert!(!matcher.matches(&pod, "env=dev").await.unwrap());
    }

    #[tokio::test]
    async fn test_object_labels_are_ignored() {
        let matcher = NamespaceMatcher::new(test_namespaces());
        let pod = ObjectBuilder::new("Pod", "api")
            .namespace("sandbox")
            .label("env", "prod")
            .build();
        assert!(!matcher.matches(&pod, "env=prod").await.unwrap());
    }

    #[tokio::test]
    async fn test_namespace_object_uses_own_labels() {
        // empty source: a namespace must never be looked up
        let matcher = NamespaceMatcher::new(StaticNamespaces::new());
        let ns = ObjectBuilder::namespace_object("fresh").label("env", "prod").build();
        assert!(matcher.matches(&ns, "env=prod").await.unwrap());

        let yaml = ObjectBuilder::namespace_object("fresh").label("env", "prod").build_yaml();
        assert!(matcher.matches(&yaml, "env=prod").await.unwrap());
    }

    #[tokio::test]
    async fn test_cluster_scoped_object_never_matches() {
        let matcher = NamespaceMatcher::new(test_namespaces());
        let node = ObjectBuilder::new("Node", "worker-1").build();
        assert!(!matcher.matches(&node, "").await.unwrap());
        assert!(!matcher.matches(&node, "!legacy").await.unwrap());
    }

    #[tokio::test]
    async fn test_unlabelled_namespace_matches_negation() {
        let matcher = NamespaceMatcher::new(test_namespaces());
        let pod = ObjectBuilder::new("Pod", "api").namespace("bare").build();
        assert!(matcher.matches(&pod, "!legacy").await.unwrap());
        assert!(!matcher.matches(&pod, "env").await.unwrap());
    }

    #[tokio::test]
    async fn test_errors() {
        let matcher = NamespaceMatcher::new(test_namespaces());

        let no_metadata = ObjectBuilder::new("Pod", "api").without_metadata().build();
        assert!(matches!(
            matcher.matches(&no_metadata, "env=prod").await,
            Err(MatchError::MissingMetadata)
        ));

        let no_kind = ObjectBuilder::new("Pod", "api").namespace("checkout").without_kind().build();
        assert!(matches!(
            matcher.matches(&no_kind, "env=prod").await,
            Err(MatchError::MissingKind)
        ));

        let orphan = ObjectBuilder::new("Pod", "api").namespace("gone").build();
        let err = matcher.matches(&orphan, "env=prod").await.unwrap_err();
        assert!(matches!(err, MatchError::Lookup(ref e) if e.is_not_found()));
        assert_eq!(err.to_string(), "namespace not found: gone");

        let pod = ObjectBuilder::new("Pod", "api").namespace("checkout").build();
        let err = matcher.matches(&pod, "env in (").await.unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_free_function() {
        let namespaces = test_namespaces();
        let pod = ObjectBuilder::new("Pod", "api").namespace("checkout").build_yaml();
        assert!(object_namespace_matches(&pod, "env=prod", &namespaces).await.unwrap());
    }
}

mod rules_tests {
    use namespace_webhook::{Rule, parse_rules, path_from_name};

    #[test]
    fn test_rules_file_to_paths() {
        let rules = parse_rules(
            "- name: env-prod\n  namespaceSelector: env=prod\n- name: my rule\n",
        )
        .unwrap();
        let paths: Vec<String> = rules.iter().map(|r| path_from_name(&r.name)).collect();
        assert_eq!(paths, vec!["/rules/env-prod", "/rules/my%20rule"]);
        assert_eq!(rules[1], Rule::new("my rule"));
    }
}

mod config_tests {
    use namespace_webhook::WebhookConfig;

    #[test]
    fn test_default_config() {
        let config = WebhookConfig::default();
        assert_eq!(config.port, 9443);
        assert_eq!(config.rules_path, "/etc/webhook/rules.yaml");
        assert_eq!(config.cert_path, "/etc/webhook/certs/tls.crt");
    }
}
