mod channel;
mod context;
mod run;

pub use channel::{Channel, ChannelEvent, ChannelOptions};
pub use context::{ExecutionContext, RunScope};
pub use run::{Artifact, LogEvent, LogLevel, Run, RunId, RunOptions, RunPatch, RunStatus, TriggerStamp};
