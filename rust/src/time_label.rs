//! Human time labels for chat list rows and message bubbles.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone};

pub const YESTERDAY_LABEL: &str = "yesterday";

/// Label for `timestamp_ms` as seen from `now`, in `now`'s time zone.
pub fn time_label<Tz: TimeZone>(now: &DateTime<Tz>, timestamp_ms: i64) -> String {
    let Some(ts) = now.timezone().timestamp_millis_opt(timestamp_ms).single() else {
        return String::new();
    };
    describe(now.naive_local(), ts.naive_local())
}

/// Same calendar day: `HH:MM`. Previous day: "yesterday". Two to six days
/// back: weekday name. Anything else: `D/M/Y`.
pub fn describe(now: NaiveDateTime, ts: NaiveDateTime) -> String {
    let days = now.date().signed_duration_since(ts.date()).num_days();
    match days {
        0 => ts.format("%H:%M").to_string(),
        1 => YESTERDAY_LABEL.to_string(),
        2..=6 => ts.format("%A").to_string(),
        _ => format!("{}/{}/{}", ts.day(), ts.month(), ts.year()),
    }
}
