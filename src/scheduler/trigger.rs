use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{
    AutoflowError, Result,
    common::Vars,
    runtime::{RunId, RunStatus},
    scheduler::{
        cron::{CronExpr, parse_timezone},
        window::MaintenanceWindow,
    },
    utils,
};

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

/// A cron schedule bound to a workflow, plus the outcome of its last fire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScheduledTrigger {
    #[serde(default)]
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub name: String,
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub input_data: Vars,
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindow>,

    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_status: Option<RunStatus>,
    #[serde(default)]
    pub last_run_error: Option<String>,
    #[serde(default)]
    pub last_run_id: Option<RunId>,
    #[serde(default)]
    pub last_skip_reason: Option<String>,
}

impl ScheduledTrigger {
    pub fn new(
        workflow_id: &str,
        cron: &str,
    ) -> Self {
        Self {
            id: utils::shortid(),
            workflow_id: workflow_id.to_string(),
            name: String::new(),
            cron: cron.to_string(),
            timezone: default_timezone(),
            enabled: true,
            test_mode: false,
            input_data: Vars::new(),
            maintenance_windows: Vec::new(),
            last_run_at: None,
            last_run_status: None,
            last_run_error: None,
            last_run_id: None,
            last_skip_reason: None,
        }
    }

    /// Parse cron and timezone, rejecting the trigger if either is invalid.
    pub fn validate(&self) -> Result<(CronExpr, Tz)> {
        if self.workflow_id.is_empty() {
            return Err(AutoflowError::Schedule("missing workflow_id in schedule".into()));
        }
        Ok((self.cron.parse()?, parse_timezone(&self.timezone)?))
    }

    /// Display name, falling back to the id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// Copy the outcome of `run_id` onto the record. Ignored when a later fire
    /// owns the record, or when it would replace a settled outcome with a
    /// non-terminal one.
    pub fn record_outcome(
        &mut self,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> bool {
        if self.last_run_id.as_deref() != Some(run_id) {
            return false;
        }
        if !status.is_terminal() && self.last_run_status.is_some_and(|s| s.is_terminal()) {
            return false;
        }
        self.last_run_status = Some(status);
        self.last_run_error = error;
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let trigger: ScheduledTrigger = serde_json::from_value(json!({"workflow_id": "wf", "cron": "0 9 * * *"})).unwrap();
        assert_eq!(trigger.timezone, "UTC");
        assert!(trigger.enabled);
        assert!(!trigger.test_mode);
        assert!(trigger.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_cron_and_timezone() {
        assert!(ScheduledTrigger::new("wf", "not a cron").validate().is_err());
        let mut trigger = ScheduledTrigger::new("wf", "0 9 * * *");
        trigger.timezone = "Nowhere/Land".into();
        assert!(matches!(trigger.validate(), Err(AutoflowError::Cron(_))));
        assert!(ScheduledTrigger::new("", "0 9 * * *").validate().is_err());
    }

    #[test]
    fn test_outcome_only_for_latest_run_and_never_unsettles() {
        let mut trigger = ScheduledTrigger::new("wf", "0 9 * * *");
        assert!(!trigger.record_outcome("r1", RunStatus::Succeeded, None));

        trigger.last_run_id = Some("r1".into());
        trigger.last_run_status = Some(RunStatus::Pending);
        assert!(trigger.record_outcome("r1", RunStatus::WaitingApproval, None));
        assert!(trigger.record_outcome("r1", RunStatus::Failed, Some("boom".into())));
        assert_eq!(trigger.last_run_error.as_deref(), Some("boom"));

        // a stale suspension report arriving after the run settled
        assert!(!trigger.record_outcome("r1", RunStatus::WaitingApproval, None));
        assert_eq!(trigger.last_run_status, Some(RunStatus::Failed));
        assert!(!trigger.record_outcome("r0", RunStatus::Succeeded, None));
    }
}
