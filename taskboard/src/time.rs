//! Wall-clock helpers for timestamps written into documents.

use chrono::{Local, SecondsFormat, Utc};

/// Current instant as an ISO-8601 UTC string with millisecond precision,
/// e.g. `2026-03-01T09:30:00.000Z`.
#[must_use]
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current local date as `M/D/YYYY`, the format task `date` fields use.
#[must_use]
pub fn today() -> String {
    Local::now().format("%-m/%-d/%Y").to_string()
}
