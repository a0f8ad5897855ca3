//! Utility functions for timestamps and formatting

use time::macros::format_description;
use time::OffsetDateTime;

/// Current system time as fractional seconds since the unix epoch
pub fn unix_now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
    dt.format(format).unwrap_or_else(|_| dt.to_string())
}

/// Format fractional unix seconds (e.g. a packet timestamp) for logging
pub fn format_unix_seconds(seconds: f64) -> String {
    let nanos = (seconds * 1_000_000_000.0) as i128;
    match OffsetDateTime::from_unix_timestamp_nanos(nanos) {
        Ok(dt) => format_datetime(&dt),
        Err(_) => format!("{:.3}", seconds),
    }
}

/// Parse a device address given either as decimal or `0x`-prefixed hex
pub fn parse_address(value: &str) -> Option<u8> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
