//! Methods selected for weaving

use serde::{Deserialize, Serialize};

use crate::symbol::MethodKey;

/// Why a method became a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum MatchOrigin {
    /// Matched by the configured descriptor at this index
    Descriptor(usize),
    /// Carries the marker annotation
    Annotation,
    /// Overrides another target
    Override,
}

/// A method that receives the metadata parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Keyed on the original (pre-weave) descriptor
    pub key: MethodKey,
    /// Relative path of the declaring unit
    pub unit: String,
    /// Index into the declaring class's method table
    pub method_index: usize,
    pub original_descriptor: String,
    pub woven_descriptor: String,
    /// Value of `targetFunctionName` at every call site of this target
    pub target_name: String,
    pub origin: MatchOrigin,
    pub is_static: bool,
    /// The method already carries the metadata parameter from an earlier pass
    pub already_woven: bool,
}

impl ResolvedTarget {
    /// Whether this pass has to edit the target's signature
    pub fn needs_signature_edit(&self) -> bool {
        !self.already_woven
    }
}
