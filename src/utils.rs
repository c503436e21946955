//! Timestamp normalization shared by the record codecs and orderings.

/// Zero-pad a timestamp that parses as a non-negative integer to at least 10
/// digits so lexicographic order matches chronological order.
///
/// Record hashes are computed over the serialized form, so normalization must
/// happen before hashing or the same record can end up with two distinct
/// identities depending on who computed them. Values that do not parse as an
/// integer are returned unchanged.
pub fn normalize_timestamp(raw: &str) -> String {
    match raw.trim().parse::<u64>() {
        Ok(secs) => format!("{secs:0>10}"),
        Err(_) => raw.to_string(),
    }
}

/// Numeric value of a (possibly unnormalized) timestamp, when it has one.
pub fn timestamp_secs(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pads_short_timestamps() {
        assert_eq!(normalize_timestamp("42"), "0000000042");
        assert_eq!(normalize_timestamp("1757467768"), "1757467768");
    }

    #[test]
    fn test_normalize_keeps_long_timestamps() {
        assert_eq!(normalize_timestamp("99999999999"), "99999999999");
    }

    #[test]
    fn test_normalize_passes_non_numeric_through() {
        assert_eq!(normalize_timestamp("yesterday"), "yesterday");
        assert_eq!(normalize_timestamp(""), "");
    }
}
