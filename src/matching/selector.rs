//! Label selector primitive.
//!
//! Rules carry their namespace selector as a string in the Kubernetes
//! label-selector syntax (`env=prod,tier in (web,api),!legacy`). The resolver only
//! needs two operations on such a string, validate and match, exposed through
//! [`SelectorPrimitive`]. [`LabelSelector`] is the default implementation and
//! evaluates through kube's [`Selector`] expressions.

use std::collections::{BTreeMap, BTreeSet};

use kube::core::{Expression, Selector, SelectorExt};
use thiserror::Error;

/// Maximum length of a label name or value.
const MAX_LABEL_LENGTH: usize = 63;
/// Maximum length of a label key prefix (DNS subdomain).
const MAX_PREFIX_LENGTH: usize = 253;

/// Errors produced while parsing a selector string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    /// A requirement could not be parsed
    #[error("invalid requirement {requirement:?}: {reason}")]
    InvalidRequirement { requirement: String, reason: String },

    /// A label key is not a valid qualified name
    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    /// A label value is not valid
    #[error("invalid label value {0:?}")]
    InvalidValue(String),
}

/// Validate and evaluate selector strings against label sets.
pub trait SelectorPrimitive: Send + Sync {
    /// Check that a selector string is well formed.
    fn validate(&self, selector: &str) -> Result<(), SelectorError>;

    /// Evaluate a selector string against a label set.
    fn matches(&self, selector: &str, labels: &BTreeMap<String, String>)
    -> Result<bool, SelectorError>;
}

/// Kubernetes set-based label selector grammar.
#[derive(Clone, Copy, Debug, Default)]
pub struct LabelSelector;

impl SelectorPrimitive for LabelSelector {
    fn validate(&self, selector: &str) -> Result<(), SelectorError> {
        parse_selector(selector).map(|_| ())
    }

    fn matches(
        &self,
        selector: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<bool, SelectorError> {
        Ok(parse_selector(selector)?.matches(labels))
    }
}

/// Parse a selector string into a kube [`Selector`].
///
/// An empty (or all-whitespace) selector selects everything.
pub fn parse_selector(selector: &str) -> Result<Selector, SelectorError> {
    split_requirements(selector)?
        .into_iter()
        .map(parse_requirement)
        .collect::<Result<Vec<_>, _>>()
        .map(Selector::from_iter)
}

/// Split on commas that are not inside a `( ... )` value set.
fn split_requirements(selector: &str) -> Result<Vec<&str>, SelectorError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| invalid(selector, "unbalanced ')'"))?;
            }
            ',' if depth == 0 => {
                parts.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(selector, "unbalanced '('"));
    }
    parts.push(&selector[start..]);

    if parts.len() == 1 && parts.iter().all(|p| p.trim().is_empty()) {
        return Ok(Vec::new());
    }
    Ok(parts)
}

fn parse_requirement(raw: &str) -> Result<Expression, SelectorError> {
    let requirement = raw.trim();
    if requirement.is_empty() {
        return Err(invalid(raw, "empty requirement"));
    }

    if let Some(key) = requirement.strip_prefix('!') {
        return Ok(Expression::DoesNotExist(validate_key(key.trim())?));
    }

    if let Some((key, value)) = requirement.split_once("!=") {
        return Ok(Expression::NotEqual(
            validate_key(key.trim())?,
            validate_value(value.trim())?,
        ));
    }

    if let Some((key, value)) = requirement
        .split_once("==")
        .or_else(|| requirement.split_once('='))
    {
        return Ok(Expression::Equal(
            validate_key(key.trim())?,
            validate_value(value.trim())?,
        ));
    }

    if let Some((head, rest)) = requirement.split_once('(') {
        let values = rest
            .strip_suffix(')')
            .ok_or_else(|| invalid(requirement, "value set must end with ')'"))?;
        let values = parse_value_set(requirement, values)?;

        let mut words = head.split_whitespace();
        let (Some(key), Some(op), None) = (words.next(), words.next(), words.next()) else {
            return Err(invalid(requirement, "expected '<key> in|notin (<values>)'"));
        };
        let key = validate_key(key)?;
        return match op {
            "in" => Ok(Expression::In(key, values)),
            "notin" => Ok(Expression::NotIn(key, values)),
            other => Err(invalid(requirement, &format!("unknown operator {other:?}"))),
        };
    }

    if requirement.contains(char::is_whitespace) {
        return Err(invalid(requirement, "unexpected whitespace"));
    }
    Ok(Expression::Exists(validate_key(requirement)?))
}

fn parse_value_set(requirement: &str, values: &str) -> Result<BTreeSet<String>, SelectorError> {
    let set = values
        .split(',')
        .map(|v| validate_value(v.trim()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if values.trim().is_empty() {
        return Err(invalid(requirement, "value set must not be empty"));
    }
    Ok(set)
}

/// A key is `[prefix/]name` where prefix is a DNS subdomain.
fn validate_key(key: &str) -> Result<String, SelectorError> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        let valid_prefix = !prefix.is_empty()
            && prefix.len() <= MAX_PREFIX_LENGTH
            && prefix.split('.').all(is_dns_label);
        if !valid_prefix {
            return Err(SelectorError::InvalidKey(key.to_string()));
        }
    }

    if name.is_empty() || !is_label_token(name) {
        return Err(SelectorError::InvalidKey(key.to_string()));
    }
    Ok(key.to_string())
}

/// Values may be empty; otherwise they follow the label name rules.
fn validate_value(value: &str) -> Result<String, SelectorError> {
    if value.is_empty() || is_label_token(value) {
        Ok(value.to_string())
    } else {
        Err(SelectorError::InvalidValue(value.to_string()))
    }
}

fn is_label_token(s: &str) -> bool {
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            s.len() <= MAX_LABEL_LENGTH
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        _ => false,
    }
}

fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            s.len() <= MAX_LABEL_LENGTH
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        }
        _ => false,
    }
}

fn invalid(requirement: &str, reason: &str) -> SelectorError {
    SelectorError::InvalidRequirement {
        requirement: requirement.to_string(),
        reason: reason.to_string(),
    }
}
