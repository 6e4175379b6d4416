//! Duration parsing utilities.

use super::ConfigError;

/// Parse a duration string like "7d", "2h", "30m", "300s", "300" into seconds.
/// Supports:
/// - Plain numbers (interpreted as seconds): "300"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "1h"
/// - Days suffix: "7d"
pub fn parse_duration_to_secs(s: &str) -> Result<u64, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    if s.is_empty() {
        return Err(invalid());
    }

    let (num_str, unit) = match s.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&s[..idx], c),
        _ => (s, 's'),
    };
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86_400,
        _ => return Err(invalid()),
    };
    let value: u64 = num_str.trim().parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Like [`parse_duration_to_secs`], in whole days. Partial days round down.
pub fn parse_duration_to_days(s: &str) -> Result<u32, ConfigError> {
    let trimmed = s.trim();
    // A bare number means days here.
    let secs = if trimmed.chars().all(|c| c.is_ascii_digit()) && !trimmed.is_empty() {
        parse_duration_to_secs(&format!("{trimmed}d"))?
    } else {
        parse_duration_to_secs(trimmed)?
    };
    u32::try_from(secs / 86_400).map_err(|_| ConfigError::InvalidDuration(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(parse_duration_to_secs("300").unwrap(), 300);
        assert_eq!(parse_duration_to_secs("5s").unwrap(), 5);
        assert_eq!(parse_duration_to_secs("1m").unwrap(), 60);
        assert_eq!(parse_duration_to_secs(" 2h ").unwrap(), 7200);
        assert_eq!(parse_duration_to_secs("7d").unwrap(), 604_800);
    }

    #[test]
    fn test_invalid() {
        for bad in ["", "abc", "5w", "-1s", "1.5h", "h"] {
            assert!(
                matches!(parse_duration_to_secs(bad), Err(ConfigError::InvalidDuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_days() {
        assert_eq!(parse_duration_to_days("14").unwrap(), 14);
        assert_eq!(parse_duration_to_days("7d").unwrap(), 7);
        assert_eq!(parse_duration_to_days("36h").unwrap(), 1);
    }
}
