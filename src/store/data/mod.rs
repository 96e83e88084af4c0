mod run;
mod trigger;
mod workflow;

pub use run::Run;
pub use trigger::Trigger;
pub use workflow::Workflow;
