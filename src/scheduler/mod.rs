//! Cron trigger subsystem.

pub mod cron;
#[allow(clippy::module_inception)]
mod scheduler;
mod trigger;
pub mod window;

pub use cron::{CronExpr, parse_timezone, preview};
pub use scheduler::{CronScheduler, RunLauncher, SchedulerOptions};
pub use trigger::ScheduledTrigger;
pub use window::MaintenanceWindow;
