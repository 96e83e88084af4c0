use std::fmt;

#[derive(Debug, Clone)]
pub enum NodeEvent {
    Running,
    Retry {
        attempt: u32,
        backoff_ms: u64,
    },
    Succeeded,
    Failed(ErrorReason),
    Skipped,
    /// approval gate suspended the run on this node
    Suspended,
}

#[derive(Debug, Clone)]
pub enum ErrorReason {
    Timeout,
    Deadlock,
    Failed(String),
}

impl fmt::Display for ErrorReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ErrorReason::Timeout => write!(f, "Timeout"),
            ErrorReason::Deadlock => write!(f, "Deadlock"),
            ErrorReason::Failed(msg) => write!(f, "Failed: {}", msg),
        }
    }
}
