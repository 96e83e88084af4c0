mod action;
mod agent;
mod models;

pub use action::DesktopAction;
pub use agent::DesktopAgent;
pub use models::*;
