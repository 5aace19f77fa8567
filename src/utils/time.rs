use chrono::{DateTime, Utc};

/// Wall-clock nanoseconds, used for the `timestamp` output field.
pub fn time_nanos() -> i64 {
    let time: DateTime<chrono::Utc> = Utc::now();
    time.timestamp_nanos_opt().unwrap_or_else(|| time.timestamp_micros() * 1000)
}
