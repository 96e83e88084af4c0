//! # Autoflow
//!
//! Autoflow is a workflow automation runtime written in Rust. Workflows are
//! directed graphs of typed action nodes (HTTP calls, data transforms, UI
//! interactions, human approval gates) executed with retries, timeouts and
//! checkpointed, resumable progress.
//!
//! ## Core Features
//!
//! - **Checkpointed execution**: every node transition is persisted, a run resumes where it stopped
//! - **Retries and timeouts**: bounded attempts with exponential backoff and a global run budget
//! - **Approval gates**: runs suspend on a gate and continue exactly there once approved
//! - **Cron triggers**: timezone-aware schedules with maintenance windows, never overlapping
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use autoflow::{EngineBuilder, RunOptions, WorkflowModel};
//!
//! let engine = EngineBuilder::new().build()?;
//! engine.launch()?;
//!
//! let workflow = WorkflowModel::from_json(json_str)?;
//! engine.deploy(&workflow)?;
//! let run = engine.run_workflow(&workflow.id, RunOptions::default()).await?;
//! ```

mod builder;
mod common;
mod config;
mod dispatcher;
mod engine;
mod error;
mod events;
mod model;
mod runtime;
pub mod scheduler;
pub mod store;
mod utils;
pub mod workflow;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use common::Vars;
pub use config::*;
pub use dispatcher::retry::RetryPolicy;
pub use engine::{Engine, EventSink, WebhookSink};
pub use error::AutoflowError;
pub use events::{ErrorReason, Event, GraphEvent, Log, Message, NodeEvent, RunEvent, RunNotification};
pub use model::*;
pub use runtime::{Artifact, Channel, ChannelEvent, ChannelOptions, ExecutionContext, LogEvent, LogLevel, Run, RunId, RunOptions, RunPatch, RunScope, RunStatus, TriggerStamp};
pub use scheduler::{CronExpr, CronScheduler, MaintenanceWindow, ScheduledTrigger};
pub use workflow::{
    Workflow,
    actions::{DesktopAgent, DesktopConfig},
    state::{NodeState, NodeStatus},
};

/// Result type alias for Autoflow operations.
pub type Result<T> = std::result::Result<T, AutoflowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
