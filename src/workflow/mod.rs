pub mod actions;
pub mod node;
pub mod state;
pub mod template;
mod workflow;

pub use workflow::Workflow;
