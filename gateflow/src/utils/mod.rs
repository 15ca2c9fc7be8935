//! Utility functions for identifiers and timestamp handling.

pub mod timestamps;

pub use timestamps::{iso_timestamp, now_utc, Timestamp};

/// Generates a new run identifier.
#[must_use]
pub fn generate_run_id() -> uuid::Uuid {
    uuid::Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id_is_v4() {
        let id = generate_run_id();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.contains(':'));
    }
}
