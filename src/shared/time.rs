use chrono::{SecondsFormat, TimeZone, Utc};

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Renders a unix timestamp for operator-facing output.
pub fn format_timestamp(secs: i64) -> String {
    match Utc.timestamp_opt(secs, 0).single() {
        Some(at) => at.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => secs.to_string(),
    }
}
