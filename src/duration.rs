//! Duration parsing for moderation commands
//!
//! Converts user-supplied duration strings into milliseconds. Bare numbers
//! are read as seconds; anything else goes through the `humantime` grammar
//! ("10m", "2 days", "1h 30min").

/// Tokens that mean "explicitly no expiry". Callers must check these
/// *before* parsing: [`parse_duration`] does not recognize them, so a
/// sentinel fed to the parser comes back as `None` just like garbage input.
pub const PERMANENT_SENTINELS: [&str; 7] =
    ["permanent", "perm", "forever", "never", "infinity", "p", "inf"];

/// Check whether the input is one of the permanent-duration sentinels.
#[must_use]
pub fn is_permanent(input: &str) -> bool {
    let token = input.trim().to_ascii_lowercase();
    PERMANENT_SENTINELS.contains(&token.as_str())
}

/// Parse a duration string into milliseconds.
///
/// Returns `None` for absent or unparseable input. Callers distinguish
/// "no duration supplied" from "invalid duration" by inspecting the input
/// themselves; this function treats both as `None`.
#[must_use]
pub fn parse_duration(input: Option<&str>) -> Option<i64> {
    let raw = input?.trim();
    if raw.is_empty() {
        return None;
    }

    // Bare numeric input is interpreted as seconds.
    if let Ok(seconds) = raw.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return seconds.checked_mul(1000);
    }

    // humantime wants "2days", not "2 days"
    let compact: String = raw.split_whitespace().collect();
    let parsed = humantime::parse_duration(&compact).ok()?;
    i64::try_from(parsed.as_millis()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_numbers_are_seconds() {
        assert_eq!(parse_duration(Some("90")), Some(90_000));
        assert_eq!(parse_duration(Some("0")), Some(0));
        assert_eq!(parse_duration(Some(" 15 ")), Some(15_000));
    }

    #[test]
    fn test_relative_shorthand() {
        assert_eq!(parse_duration(Some("10m")), Some(600_000));
        assert_eq!(parse_duration(Some("2 days")), Some(172_800_000));
        assert_eq!(parse_duration(Some("1h 30min")), Some(5_400_000));
        assert_eq!(parse_duration(Some("45s")), Some(45_000));
    }

    #[test]
    fn test_invalid_input() {
        assert_eq!(parse_duration(None), None);
        assert_eq!(parse_duration(Some("")), None);
        assert_eq!(parse_duration(Some("soon")), None);
        assert_eq!(parse_duration(Some("-5")), None);
    }

    #[test]
    fn test_sentinels_not_recognized_by_parser() {
        // The sentinel set is the caller's job, not the parser's.
        assert_eq!(parse_duration(Some("permanent")), None);
        assert_eq!(parse_duration(Some("forever")), None);
    }

    #[test]
    fn test_is_permanent() {
        for token in PERMANENT_SENTINELS {
            assert!(is_permanent(token));
        }
        assert!(is_permanent("PERM"));
        assert!(is_permanent(" forever "));
        assert!(!is_permanent("10m"));
        assert!(!is_permanent("permanently"));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(parse_duration(Some("3h")), parse_duration(Some("3h")));
    }
}
