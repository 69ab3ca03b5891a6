//! Namespace selector matching for admission objects.
//!
//! - [`document`]: capability traits over JSON and YAML document trees
//! - [`labels`]: label set extraction from those trees
//! - [`selector`]: label-selector validation and evaluation
//! - [`resolver`]: the match decision itself

pub mod document;
pub mod labels;
pub mod resolver;
pub mod selector;

pub use document::{DynamicMap, DynamicValue};
pub use labels::lookup_labels;
pub use resolver::{MatchError, NAMESPACE_KIND, NamespaceMatcher, object_namespace_matches};
pub use selector::{LabelSelector, SelectorError, SelectorPrimitive};
