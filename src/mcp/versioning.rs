//! Protocol version negotiation

/// Supported protocol versions, newest first.
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-11-25", "2025-06-18", "2025-03-26"];

/// Newest supported version
pub fn latest() -> &'static str {
    SUPPORTED_VERSIONS[0]
}

/// Pick `requested` when supported, otherwise fall back to the newest version.
pub fn negotiate(requested: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .copied()
        .find(|version| *version == requested)
        .unwrap_or_else(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_version_is_echoed() {
        assert_eq!(negotiate("2025-06-18"), "2025-06-18");
        assert_eq!(negotiate("2025-03-26"), "2025-03-26");
    }

    #[test]
    fn unknown_version_falls_back_to_latest() {
        assert_eq!(negotiate("2099-01-01"), "2025-11-25");
        assert_eq!(negotiate(""), latest());
    }

    #[test]
    fn negotiation_is_idempotent() {
        for requested in ["2025-06-18", "1999-01-01", "2025-11-25"] {
            let once = negotiate(requested);
            assert_eq!(negotiate(once), once);
        }
    }
}
