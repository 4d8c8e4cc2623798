//! Formatting helpers for human-readable byte sizes, rates and durations.

use std::time::Duration;

use crate::error::{Error, Result};

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const SPEED_UNITS: [&str; 5] = ["B/s", "KB/s", "MB/s", "GB/s", "TB/s"];

/// Scales `value` by powers of 1024 to the largest unit not exceeding it,
/// clamped to the last unit in `units`.
fn scale(mut value: f64, units: &[&str; 5]) -> String {
    let mut index = 0;
    while value >= 1024.0 && index < units.len() - 1 {
        value /= 1024.0;
        index += 1;
    }
    format!("{value:.2} {}", units[index])
}

/// Formats a byte count as a human-readable string (B, KB, MB, GB, TB).
///
/// Zero is rendered as the literal `"0 B"`.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    scale(bytes as f64, &SIZE_UNITS)
}

/// Formats a signed byte count, rejecting negative values.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `bytes` is negative.
pub fn format_file_size(bytes: i64) -> Result<String> {
    let bytes = u64::try_from(bytes)
        .map_err(|_| Error::InvalidInput(format!("file size cannot be negative: {bytes}")))?;
    Ok(format_bytes(bytes))
}

/// Formats a transfer rate in bytes per second.
///
/// Zero is rendered as the literal `"0B/s"`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the rate is negative or not a number.
pub fn format_speed(bytes_per_sec: f64) -> Result<String> {
    if bytes_per_sec.is_nan() || bytes_per_sec < 0.0 {
        return Err(Error::InvalidInput(format!(
            "speed cannot be negative: {bytes_per_sec}"
        )));
    }
    if bytes_per_sec == 0.0 {
        return Ok("0B/s".to_string());
    }
    Ok(scale(bytes_per_sec, &SPEED_UNITS))
}

/// Formats a duration as a human-readable string (e.g. "5.0s", "1m 05s", "1h 01m 05s").
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!(
            "{}h {:02}m {:02}s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, d.subsec_millis() / 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(500), "500.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
        assert_eq!(format_bytes(1_099_511_627_776), "1.00 TB");
    }

    #[test]
    fn format_bytes_clamps_to_terabytes() {
        assert_eq!(format_bytes(2048 * 1_099_511_627_776), "2048.00 TB");
    }

    #[test]
    fn format_file_size_zero_and_kilobyte() {
        assert_eq!(format_file_size(0).unwrap(), "0 B");
        assert_eq!(format_file_size(1024).unwrap(), "1.00 KB");
    }

    #[test]
    fn format_file_size_rejects_negative() {
        let err = format_file_size(-1).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn format_speed_zero_literal() {
        assert_eq!(format_speed(0.0).unwrap(), "0B/s");
    }

    #[test]
    fn format_speed_units() {
        assert_eq!(format_speed(512.0).unwrap(), "512.00 B/s");
        assert_eq!(format_speed(1024.0).unwrap(), "1.00 KB/s");
        assert_eq!(format_speed(3.5 * 1_048_576.0).unwrap(), "3.50 MB/s");
    }

    #[test]
    fn format_speed_below_one_byte() {
        assert_eq!(format_speed(0.5).unwrap(), "0.50 B/s");
    }

    #[test]
    fn format_speed_rejects_negative_and_nan() {
        assert!(matches!(format_speed(-1.0), Err(Error::InvalidInput(_))));
        assert!(matches!(format_speed(f64::NAN), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn format_duration_units() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 01m 05s");
        assert_eq!(format_duration(Duration::from_millis(500)), "0.5s");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn format_bytes_never_panics(bytes in 0u64..u64::MAX) {
                let _ = format_bytes(bytes);
            }

            #[test]
            fn scaled_value_stays_within_one_unit(bytes in 1u64..(1u64 << 50)) {
                let formatted = format_bytes(bytes);
                let (number, _) = formatted.split_once(' ').unwrap();
                let value: f64 = number.parse().unwrap();
                prop_assert!((1.0..=1024.0).contains(&value));
            }

            #[test]
            fn non_negative_sizes_always_format(bytes in 0i64..i64::MAX) {
                prop_assert!(format_file_size(bytes).is_ok());
            }

            #[test]
            fn negative_sizes_always_rejected(bytes in i64::MIN..0i64) {
                prop_assert!(format_file_size(bytes).is_err());
            }
        }
    }
}
