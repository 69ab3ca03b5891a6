//! Label set extraction from decoded documents.

use std::collections::BTreeMap;

use tracing::trace;

use super::document::{DynamicMap, DynamicValue};

/// Key under which labels live in object metadata.
pub const LABELS_KEY: &str = "labels";

/// Extract the `labels` entry of a map-like value as a flat string map.
///
/// Works for any [`DynamicValue`] representation. Returns an empty map when the
/// value is not a map or has no `labels` key. Entries whose key or value is not
/// a string are dropped.
pub fn lookup_labels(value: &dyn DynamicValue) -> BTreeMap<String, String> {
    let Some(map) = value.as_map() else {
        trace!("value is not a map, no labels");
        return BTreeMap::new();
    };

    map.entries()
        .find(|(key, _)| key.as_str() == Some(LABELS_KEY))
        .map(|(_, labels)| string_map(labels))
        .unwrap_or_default()
}

/// Whether a map-like value carries a `labels` key at its top level.
pub fn has_labels(value: &dyn DynamicValue) -> bool {
    value
        .as_map()
        .is_some_and(|map| map.entries().any(|(key, _)| key.as_str() == Some(LABELS_KEY)))
}

/// Coerce a value into `BTreeMap<String, String>`, ignoring non-string entries.
fn string_map(value: &dyn DynamicValue) -> BTreeMap<String, String> {
    let Some(map) = value.as_map() else {
        return BTreeMap::new();
    };
    collect_strings(map)
}

fn collect_strings(map: &dyn DynamicMap) -> BTreeMap<String, String> {
    map.entries()
        .filter_map(|(key, value)| Some((key.as_str()?.to_string(), value.as_str()?.to_string())))
        .collect()
}
