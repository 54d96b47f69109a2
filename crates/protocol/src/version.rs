//! Versioning for the published delta schema.
//!
//! # Version History
//!
//! | Version | Changes |
//! |---------|---------|
//! | 1 | Initial delta schema |
//!
//! # Breaking Changes (require SCHEMA_VERSION bump)
//!
//! - Renaming or removing a metric suffix
//! - Changing the unit of a published metric
//!
//! # Non-Breaking Changes (safe without version bump)
//!
//! - Adding new metric suffixes
//! - Adding new optional envelope fields with `#[serde(default)]`
//!
//! Consumers should accept anything between `MIN_SUPPORTED_SCHEMA_VERSION`
//! and `SCHEMA_VERSION`.

/// Current delta schema version. Bump when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Oldest schema version consumers of this build are expected to handle.
pub const MIN_SUPPORTED_SCHEMA_VERSION: u32 = 1;

pub fn is_supported(version: u32) -> bool {
    (MIN_SUPPORTED_SCHEMA_VERSION..=SCHEMA_VERSION).contains(&version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_range() {
        assert_eq!(SCHEMA_VERSION, 1);
        assert!(is_supported(SCHEMA_VERSION));
        assert!(!is_supported(0));
        assert!(!is_supported(SCHEMA_VERSION + 1));
    }
}
