//! On-disk test bundles.

pub mod bundle;

pub use bundle::{BundleError, TestBundle, TestBundleMeta, TestBundleOpen, TEST_BUNDLE_SCHEMA_VERSION};
