//! Representation-agnostic access to decoded cluster documents.
//!
//! Admission payloads arrive as JSON, while rule fixtures and documents read from
//! disk are usually YAML. The two decoders produce structurally equivalent trees
//! with different map types: `serde_json` maps always have string keys, whereas
//! `serde_yaml` maps are keyed by arbitrary values. The matching logic only ever
//! asks "is this a map, what are its entries, is this a string", so it is written
//! against the [`DynamicValue`] and [`DynamicMap`] capabilities instead of a
//! concrete tree type.

/// A node of a decoded document.
///
/// `Sync` so that borrowed documents can be held across `.await` points in
/// request handlers.
pub trait DynamicValue: Sync {
    /// The node as a string, if it is one.
    fn as_str(&self) -> Option<&str>;

    /// The node as a map, if it is one.
    fn as_map(&self) -> Option<&dyn DynamicMap>;
}

/// A map node of a decoded document.
pub trait DynamicMap: Sync {
    /// All entries of the map, in the map's own iteration order.
    fn entries(&self) -> Box<dyn Iterator<Item = (&dyn DynamicValue, &dyn DynamicValue)> + '_>;

    /// Look up the value stored under a string key.
    fn get(&self, key: &str) -> Option<&dyn DynamicValue>;
}

impl DynamicValue for String {
    fn as_str(&self) -> Option<&str> {
        Some(self.as_str())
    }

    fn as_map(&self) -> Option<&dyn DynamicMap> {
        None
    }
}

impl DynamicValue for serde_json::Value {
    fn as_str(&self) -> Option<&str> {
        serde_json::Value::as_str(self)
    }

    fn as_map(&self) -> Option<&dyn DynamicMap> {
        self.as_object().map(|map| map as &dyn DynamicMap)
    }
}

impl DynamicMap for serde_json::Map<String, serde_json::Value> {
    fn entries(&self) -> Box<dyn Iterator<Item = (&dyn DynamicValue, &dyn DynamicValue)> + '_> {
        Box::new(
            self.iter()
                .map(|(k, v)| (k as &dyn DynamicValue, v as &dyn DynamicValue)),
        )
    }

    fn get(&self, key: &str) -> Option<&dyn DynamicValue> {
        serde_json::Map::get(self, key).map(|v| v as &dyn DynamicValue)
    }
}

impl DynamicValue for serde_yaml::Value {
    fn as_str(&self) -> Option<&str> {
        match self {
            serde_yaml::Value::String(s) => Some(s.as_str()),
            // `!tag value` wraps the real node
            serde_yaml::Value::Tagged(tagged) => DynamicValue::as_str(&tagged.value),
            _ => None,
        }
    }

    fn as_map(&self) -> Option<&dyn DynamicMap> {
        match self {
            serde_yaml::Value::Mapping(map) => Some(map as &dyn DynamicMap),
            serde_yaml::Value::Tagged(tagged) => DynamicValue::as_map(&tagged.value),
            _ => None,
        }
    }
}

impl DynamicMap for serde_yaml::Mapping {
    fn entries(&self) -> Box<dyn Iterator<Item = (&dyn DynamicValue, &dyn DynamicValue)> + '_> {
        Box::new(
            self.iter()
                .map(|(k, v)| (k as &dyn DynamicValue, v as &dyn DynamicValue)),
        )
    }

    fn get(&self, key: &str) -> Option<&dyn DynamicValue> {
        serde_yaml::Mapping::get(self, key).map(|v| v as &dyn DynamicValue)
    }
}
