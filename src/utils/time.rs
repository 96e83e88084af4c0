use chrono::{DateTime, Utc};

#[allow(unused)]
pub fn time_millis() -> i64 {
    let time: DateTime<Utc> = Utc::now();
    time.timestamp_millis()
}

/// Milliseconds elapsed between two instants, clamped at zero.
pub fn elapsed_millis(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}
