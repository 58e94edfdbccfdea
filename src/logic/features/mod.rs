//! Features Module - Feature Extraction Engine
//!
//! Turns a command line into a fixed-schema, versioned feature vector.
//!
//! ## Structure
//! - `layout`: authoritative feature names, version and hash
//! - `vector`: the `FeatureVector` container
//! - `patterns`: verb tables, path categories, VCS argument parsing
//! - `extractor`: `extract(raw_command, context)`

pub mod layout;
pub mod vector;
pub mod patterns;
pub mod extractor;


pub use layout::{
    feature_index, layout_hash, validate_layout, LayoutMismatchError, FEATURE_COUNT, FEATURE_LAYOUT,
    FEATURE_VERSION,
};
pub use vector::{FeatureVector, FeatureVectorBuilder};
pub use extractor::{extract, extract_parsed, ExtractionContext};
