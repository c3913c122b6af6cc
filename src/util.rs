//! Shared utility functions.

/// Convert a duration in seconds to a human-readable string.
///
/// >= 86400s -> "Xd", >= 3600s -> "Xh", >= 60s -> "Xm", otherwise -> "Xs".
pub fn human_duration(secs: u64) -> String {
    if secs >= 86400 {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration_seconds() {
        assert_eq!(human_duration(0), "0s");
        assert_eq!(human_duration(59), "59s");
    }

    #[test]
    fn test_human_duration_minutes_and_hours() {
        assert_eq!(human_duration(60), "1m");
        assert_eq!(human_duration(3599), "59m");
        assert_eq!(human_duration(3600), "1h");
        assert_eq!(human_duration(86399), "23h");
    }

    #[test]
    fn test_human_duration_days() {
        assert_eq!(human_duration(86400), "1d");
        // a leaf certificate's full year
        assert_eq!(human_duration(365 * 86400), "365d");
    }
}
