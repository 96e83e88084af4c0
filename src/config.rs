use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    AutoflowError, Result,
    scheduler::{MaintenanceWindow, ScheduledTrigger, SchedulerOptions, cron::DEFAULT_SCAN_WINDOW_DAYS},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// event sinks
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    /// schedules registered at startup
    #[serde(default)]
    pub triggers: Vec<ScheduledTrigger>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// number of async worker threads when the engine owns its runtime, defaults to 16
    pub async_worker_thread_number: u16,
    /// compiled definitions kept in memory
    pub definition_cache_size: usize,
    /// `{{secret:KEY}}` reads the environment variable `<prefix>KEY`
    pub secret_env_prefix: String,
    /// base url of the desktop agent serving `desktop` nodes, eg. `http://127.0.0.1:7070`
    pub desktop_agent_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            async_worker_thread_number: 16,
            definition_cache_size: 256,
            secret_env_prefix: "AUTOFLOW_SECRET_".to_string(),
            desktop_agent_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub refresh_interval_secs: u64,
    pub scan_window_days: i64,
    /// applied to every schedule
    pub maintenance_windows: Vec<MaintenanceWindow>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: 60,
            scan_window_days: DEFAULT_SCAN_WINDOW_DAYS,
            maintenance_windows: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn options(&self) -> SchedulerOptions {
        SchedulerOptions {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            scan_window_days: self.scan_window_days,
            maintenance_windows: self.maintenance_windows.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// event names to deliver, eg. `run.failed`; empty delivers everything
    #[serde(default)]
    pub events: Vec<String>,
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| AutoflowError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;
        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        for trigger in config.triggers.iter() {
            trigger.validate()?;
        }
        Ok(config)
    }
}
