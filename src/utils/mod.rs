pub mod time;

/// Random url-safe identifier used for runs, log entries and artifacts.
pub fn longid() -> String {
    nanoid::nanoid!()
}

/// Short identifier for human-facing references such as trigger ids.
pub fn shortid() -> String {
    nanoid::nanoid!(10)
}
