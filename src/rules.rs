//! Webhook rules.
//!
//! A rule names a webhook endpoint and, optionally, the namespace selector an
//! object's namespace must satisfy for the rule to apply. Rules are loaded once
//! at startup from a YAML (or JSON) file:
//!
//! ```yaml
//! - name: env-prod
//!   namespaceSelector: env=prod
//! - name: everything
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A matching rule served as its own webhook endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique rule name; determines the endpoint path
    pub name: String,

    /// Label selector the object's namespace must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<String>,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace_selector: None,
        }
    }

    pub fn with_namespace_selector(mut self, selector: impl Into<String>) -> Self {
        self.namespace_selector = Some(selector.into());
        self
    }
}

/// Errors that can occur when loading rules
#[derive(Error, Debug)]
pub enum RulesError {
    /// The rules file could not be read
    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The rules file is not a valid rule list
    #[error("failed to parse rules: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A rule has an empty name
    #[error("rule #{0} has an empty name")]
    EmptyName(usize),
}

/// Parse a rule list from YAML or JSON text
pub fn parse_rules(text: &str) -> Result<Vec<Rule>, RulesError> {
    let rules: Vec<Rule> = serde_yaml::from_str(text)?;
    if let Some(index) = rules.iter().position(|r| r.name.trim().is_empty()) {
        return Err(RulesError::EmptyName(index));
    }
    Ok(rules)
}

/// Read and parse a rules file
pub async fn load_rules(path: impl AsRef<Path>) -> Result<Vec<Rule>, RulesError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
    parse_rules(&text)
}
