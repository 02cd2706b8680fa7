use time::macros::format_description;
use time::OffsetDateTime;

pub const HOUR_MS: i64 = 60 * 60 * 1_000;

/// Epoch-millisecond window covering the `hours` before `end_ms`.
///
/// Used to bound the historical candle query to the prior day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookbackWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl LookbackWindow {
    pub fn ending_at(end_ms: i64, hours: i64) -> Self {
        Self {
            start_ms: end_ms.saturating_sub(hours.saturating_mul(HOUR_MS)),
            end_ms,
        }
    }
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn now_s() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// UTC timestamp in the `Updated At` column format, e.g. `2026-08-05 12:00:00`.
pub fn format_sheet_timestamp(epoch_s: i64) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp(epoch_s)
        .ok()
        .and_then(|dt| dt.format(&format).ok())
        .unwrap_or_else(|| epoch_s.to_string())
}
