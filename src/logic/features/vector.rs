//! Feature Vector
//!
//! Versioned, fixed-size vector with layout metadata. Values are `f32`;
//! boolean features are `0.0` / `1.0`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::layout::{
    feature_index, layout_hash, validate_layout, LayoutMismatchError, FEATURE_COUNT,
    FEATURE_LAYOUT, FEATURE_VERSION,
};

// ============================================================================
// VERSIONED FEATURE VECTOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Feature layout version
    pub version: u8,
    /// CRC32 hash of the feature layout
    pub layout_hash: u32,
    /// Values in `FEATURE_LAYOUT` order
    pub values: [f32; FEATURE_COUNT],
}

impl FeatureVector {
    /// Zeroed vector with the current layout
    pub fn new() -> Self {
        Self {
            version: FEATURE_VERSION,
            layout_hash: layout_hash(),
            values: [0.0; FEATURE_COUNT],
        }
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Option<f32> {
        feature_index(name).and_then(|i| self.get(i))
    }

    /// Missing features read as zero
    pub fn value(&self, name: &str) -> f32 {
        self.get_by_name(name).unwrap_or(0.0)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.value(name) >= 0.5
    }

    pub fn set(&mut self, index: usize, value: f32) {
        if index < FEATURE_COUNT {
            self.values[index] = value;
        }
    }

    pub fn set_by_name(&mut self, name: &str, value: f32) -> bool {
        match feature_index(name) {
            Some(index) => {
                self.set(index, value);
                true
            }
            None => false,
        }
    }

    pub fn set_flag(&mut self, name: &str, on: bool) -> bool {
        self.set_by_name(name, if on { 1.0 } else { 0.0 })
    }

    /// Layout compatibility check
    pub fn validate(&self) -> Result<(), LayoutMismatchError> {
        validate_layout(self.version, self.layout_hash)
    }

    /// Index of the first NaN or infinite value
    pub fn first_non_finite(&self) -> Option<usize> {
        self.values.iter().position(|v| !v.is_finite())
    }

    /// `name -> value`, the shape stored in audit records
    pub fn named_values(&self) -> BTreeMap<String, f32> {
        FEATURE_LAYOUT
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    /// Names of features that are set, for prompts and logs
    pub fn active_features(&self) -> Vec<(&'static str, f32)> {
        FEATURE_LAYOUT
            .iter()
            .zip(self.values.iter())
            .filter(|(_, v)| **v != 0.0)
            .map(|(name, value)| (*name, *value))
            .collect()
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// BUILDER PATTERN
// ============================================================================

/// Named setters, used by tests and by replay tooling
pub struct FeatureVectorBuilder {
    vector: FeatureVector,
}

impl FeatureVectorBuilder {
    pub fn new() -> Self {
        Self {
            vector: FeatureVector::new(),
        }
    }

    pub fn set(mut self, name: &str, value: f32) -> Self {
        self.vector.set_by_name(name, value);
        self
    }

    pub fn flag(self, name: &str) -> Self {
        self.set(name, 1.0)
    }

    pub fn verb_risk_class(self, class: u8) -> Self {
        self.set("verb_risk_class", class as f32)
    }

    pub fn build(self) -> FeatureVector {
        self.vector
    }
}

impl Default for FeatureVectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_vector_new() {
        let vector = FeatureVector::new();
        assert_eq!(vector.version, FEATURE_VERSION);
        assert_eq!(vector.layout_hash, layout_hash());
        assert!(vector.validate().is_ok());
        assert!(vector.active_features().is_empty());
    }

    #[test]
    fn test_builder_and_lookup() {
        let vector = FeatureVectorBuilder::new()
            .flag("recursive_delete")
            .set("arg_count", 3.0)
            .build();

        assert!(vector.flag("recursive_delete"));
        assert_eq!(vector.value("arg_count"), 3.0);
        assert_eq!(vector.value("nonexistent"), 0.0);
        assert_eq!(vector.active_features().len(), 2);
    }

    #[test]
    fn test_set_unknown_name() {
        let mut vector = FeatureVector::new();
        assert!(!vector.set_by_name("cpu_percent", 1.0));
        assert!(vector.set_flag("has_pipe", true));
    }

    #[test]
    fn test_non_finite_detected() {
        let mut vector = FeatureVector::new();
        assert_eq!(vector.first_non_finite(), None);
        vector.set(5, f32::NAN);
        assert_eq!(vector.first_non_finite(), Some(5));
    }

    #[test]
    fn test_named_values_cover_layout() {
        let named = FeatureVector::new().named_values();
        assert_eq!(named.len(), FEATURE_COUNT);
        assert!(named.contains_key("fork_bomb"));
    }
}
