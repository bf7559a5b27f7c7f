//! Persisted model bundle: detector + normalization parameters + calibration bounds + schema.

mod artifact;

pub use artifact::{ModelBundle, BUNDLE_FORMAT_VERSION, REQUIRED_FIELDS};
