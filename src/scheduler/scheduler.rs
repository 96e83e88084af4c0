//! Armed cron timers for every enabled schedule.
//!
//! Each enabled trigger owns exactly one timer task. A timer sleeps until the
//! next fire time, fires, and loops; firing never waits for the run to finish.
//! A schedule whose previous run is still executing skips the fire.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    AutoflowError, Result,
    runtime::{Run, RunId, RunOptions, RunStatus, TriggerStamp},
    scheduler::{
        cron::{CronExpr, DEFAULT_SCAN_WINDOW_DAYS, parse_timezone},
        trigger::ScheduledTrigger,
        window::{MaintenanceWindow, blocking_reason},
    },
    store::Store,
    utils,
};

/// What the scheduler needs from the engine to start a run.
#[async_trait]
pub trait RunLauncher: Send + Sync {
    /// Create and persist a pending run of the latest workflow version.
    fn create_run(
        &self,
        workflow_id: &str,
        options: RunOptions,
    ) -> Result<RunId>;

    /// Drive the run until it terminates or suspends.
    async fn execute(
        &self,
        run_id: &str,
    ) -> Result<Run>;
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub refresh_interval: Duration,
    pub scan_window_days: i64,
    /// windows applied to every schedule on top of its own
    pub maintenance_windows: Vec<MaintenanceWindow>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            scan_window_days: DEFAULT_SCAN_WINDOW_DAYS,
            maintenance_windows: Vec::new(),
        }
    }
}

struct ArmedTimer {
    cron: String,
    timezone: String,
    handle: JoinHandle<()>,
}

/// Removes the firing marker when the fire completes, however it ends.
struct FiringGuard {
    firing: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl Drop for FiringGuard {
    fn drop(&mut self) {
        self.firing.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.id);
    }
}

#[derive(Clone)]
pub struct CronScheduler {
    store: Arc<Store>,
    launcher: Arc<dyn RunLauncher>,
    options: Arc<SchedulerOptions>,
    timers: Arc<Mutex<HashMap<String, ArmedTimer>>>,
    firing: Arc<Mutex<HashSet<String>>>,
    refresher: Arc<Mutex<Option<JoinHandle<()>>>>,
    running: Arc<AtomicBool>,
    handle: Handle,
}

impl CronScheduler {
    pub fn new(
        handle: Handle,
        store: Arc<Store>,
        launcher: Arc<dyn RunLauncher>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            handle,
            store,
            launcher,
            options: Arc::new(options),
            timers: Arc::new(Mutex::new(HashMap::new())),
            firing: Arc::new(Mutex::new(HashSet::new())),
            refresher: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn scan_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.options.scan_window_days)
    }

    /// Arm every enabled schedule and keep the timers in sync periodically.
    pub fn start(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.refresh()?;

        let scheduler = self.clone();
        let interval = self.options.refresh_interval;
        let handle = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = scheduler.refresh() {
                    warn!(error = %err, "schedule refresh failed");
                }
            }
        });
        if let Some(previous) = self.refresher.lock().unwrap_or_else(|e| e.into_inner()).replace(handle) {
            previous.abort();
        }
        info!(armed = self.armed().len(), "cron scheduler started");
        Ok(())
    }

    /// Disarm every timer. Runs already executing are not interrupted.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.refresher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        info!("cron scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ids of the schedules with an armed timer, sorted.
    pub fn armed(&self) -> Vec<String> {
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = timers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_firing(
        &self,
        id: &str,
    ) -> bool {
        self.firing.lock().unwrap_or_else(|e| e.into_inner()).contains(id)
    }

    /// Diff enabled schedules against armed timers.
    ///
    /// Removed or disabled schedules are disarmed; a schedule is (re)armed
    /// when it has no timer or its cron or timezone changed.
    pub fn refresh(&self) -> Result<()> {
        let triggers = self.store.list_triggers()?;
        let enabled: HashMap<&str, &ScheduledTrigger> = triggers.iter().filter(|t| t.enabled).map(|t| (t.id.as_str(), t)).collect();

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.retain(|id, timer| {
            let keep = enabled.contains_key(id.as_str());
            if !keep {
                timer.handle.abort();
                info!(schedule_id = %id, "schedule disarmed");
            }
            keep
        });

        for (id, trigger) in enabled {
            let unchanged = timers.get(id).is_some_and(|timer| timer.cron == trigger.cron && timer.timezone == trigger.timezone);
            if unchanged {
                continue;
            }
            if let Some(previous) = timers.remove(id) {
                previous.handle.abort();
            }
            let (cron, tz) = match trigger.validate() {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(schedule_id = %id, cron = %trigger.cron, error = %err, "invalid schedule, not armed");
                    continue;
                }
            };

            let scheduler = self.clone();
            let schedule_id = id.to_string();
            let handle = self.handle.spawn(async move { scheduler.run_timer(schedule_id, cron, tz).await });
            timers.insert(
                id.to_string(),
                ArmedTimer {
                    cron: trigger.cron.clone(),
                    timezone: trigger.timezone.clone(),
                    handle,
                },
            );
            info!(schedule_id = %id, cron = %trigger.cron, timezone = %trigger.timezone, "schedule armed");
        }
        Ok(())
    }

    async fn run_timer(
        self,
        id: String,
        cron: CronExpr,
        tz: Tz,
    ) {
        let mut cursor = Utc::now();
        loop {
            let now = Utc::now().max(cursor);
            let Some(fire_at) = cron.next_after(now, tz, self.scan_window()) else {
                warn!(schedule_id = %id, cron = %cron, "no fire time within scan window, timer idle");
                return;
            };
            let delay = (fire_at - Utc::now()).to_std().unwrap_or_default();
            debug!(schedule_id = %id, fire_at = %fire_at, delay_secs = delay.as_secs(), "next fire scheduled");

            tokio::time::sleep(delay).await;
            cursor = fire_at;

            if let Err(err) = self.fire(&id, fire_at, false).await {
                error!(schedule_id = %id, error = %err, "scheduled fire failed");
            }
        }
    }

    /// Fire a schedule once.
    ///
    /// Returns `Ok(None)` when the fire was suppressed: the schedule is
    /// already firing, or `fire_at` falls inside a maintenance window and
    /// windows are honored.
    async fn fire(
        &self,
        id: &str,
        fire_at: DateTime<Utc>,
        bypass_windows: bool,
    ) -> Result<Option<RunId>> {
        let trigger = self.store.find_trigger(id)?;

        if !bypass_windows {
            let tz = parse_timezone(&trigger.timezone)?;
            let windows: Vec<MaintenanceWindow> = trigger.maintenance_windows.iter().chain(self.options.maintenance_windows.iter()).cloned().collect();
            if let Some(reason) = blocking_reason(&windows, fire_at, tz) {
                info!(schedule_id = %id, reason = %reason, "fire skipped");
                self.store.modify_trigger(id, |t| t.last_skip_reason = Some(reason))?;
                return Ok(None);
            }
        }

        let Some(guard) = self.claim(id) else {
            info!(schedule_id = %id, "previous run still executing, fire skipped");
            return Ok(None);
        };

        let options = RunOptions {
            test_mode: trigger.test_mode,
            input: trigger.input_data.clone(),
            trigger: Some(TriggerStamp {
                schedule_id: trigger.id.clone(),
                schedule_name: trigger.label().to_string(),
                timezone: trigger.timezone.clone(),
                fired_at: fire_at,
            }),
        };

        let run_id = match self.launcher.create_run(&trigger.workflow_id, options) {
            Ok(run_id) => run_id,
            Err(err) => {
                let message = err.to_string();
                self.store.modify_trigger(id, |t| {
                    t.last_run_at = Some(fire_at);
                    t.last_run_status = Some(RunStatus::Failed);
                    t.last_run_error = Some(message);
                    t.last_run_id = None;
                })?;
                return Err(err);
            }
        };

        self.store.modify_trigger(id, |t| {
            t.last_run_at = Some(fire_at);
            t.last_run_status = Some(RunStatus::Pending);
            t.last_run_error = None;
            t.last_run_id = Some(run_id.clone());
            t.last_skip_reason = None;
        })?;
        info!(schedule_id = %id, run_id = %run_id, workflow_id = %trigger.workflow_id, "schedule fired");

        let store = self.store.clone();
        let launcher = self.launcher.clone();
        let schedule_id = id.to_string();
        let spawned_run_id = run_id.clone();
        self.handle.spawn(async move {
            let _guard = guard;
            let (status, error) = match launcher.execute(&spawned_run_id).await {
                Ok(run) => (run.status, run.error),
                Err(err) => (RunStatus::Failed, Some(err.to_string())),
            };
            let recorded = store.modify_trigger(&schedule_id, |t| {
                t.record_outcome(&spawned_run_id, status, error);
            });
            if let Err(err) = recorded {
                warn!(schedule_id = %schedule_id, run_id = %spawned_run_id, error = %err, "failed to record run outcome");
            }
            debug!(schedule_id = %schedule_id, run_id = %spawned_run_id, status = status.as_ref(), "scheduled run settled");
        });

        Ok(Some(run_id))
    }

    fn claim(
        &self,
        id: &str,
    ) -> Option<FiringGuard> {
        let mut firing = self.firing.lock().unwrap_or_else(|e| e.into_inner());
        if !firing.insert(id.to_string()) {
            return None;
        }
        Some(FiringGuard {
            firing: self.firing.clone(),
            id: id.to_string(),
        })
    }

    /// Fire a schedule immediately, ignoring maintenance windows.
    pub async fn run_now(
        &self,
        id: &str,
    ) -> Result<RunId> {
        match self.fire(id, Utc::now(), true).await? {
            Some(run_id) => Ok(run_id),
            None => Err(AutoflowError::Schedule(format!("schedule '{}' is already firing", id))),
        }
    }

    /// Next `count` fire times for a cron expression, from now.
    pub fn preview(
        &self,
        cron: &str,
        timezone: &str,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        let expr = cron.parse::<CronExpr>()?;
        let tz = parse_timezone(timezone)?;
        Ok(expr.upcoming(Utc::now(), tz, count, self.scan_window()))
    }

    pub fn create_trigger(
        &self,
        mut trigger: ScheduledTrigger,
    ) -> Result<ScheduledTrigger> {
        trigger.validate()?;
        if trigger.id.is_empty() {
            trigger.id = utils::shortid();
        }
        self.store.create_trigger(&trigger)?;
        self.after_mutation()?;
        Ok(trigger)
    }

    pub fn update_trigger(
        &self,
        trigger: ScheduledTrigger,
    ) -> Result<ScheduledTrigger> {
        trigger.validate()?;
        self.store.update_trigger(&trigger)?;
        self.after_mutation()?;
        Ok(trigger)
    }

    pub fn delete_trigger(
        &self,
        id: &str,
    ) -> Result<bool> {
        let deleted = self.store.delete_trigger(id)?;
        self.after_mutation()?;
        Ok(deleted)
    }

    pub fn get_trigger(
        &self,
        id: &str,
    ) -> Result<ScheduledTrigger> {
        self.store.find_trigger(id)
    }

    pub fn list_triggers(&self) -> Result<Vec<ScheduledTrigger>> {
        self.store.list_triggers()
    }

    fn after_mutation(&self) -> Result<()> {
        if self.is_running() { self.refresh() } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use super::*;
    use crate::{
        runtime::ExecutionContext,
        store::{DbStore, MemStore},
    };

    #[derive(Default)]
    struct FakeLauncher {
        created: AtomicUsize,
        release: Notify,
        fail_create: bool,
    }

    #[async_trait]
    impl RunLauncher for FakeLauncher {
        fn create_run(
            &self,
            workflow_id: &str,
            options: RunOptions,
        ) -> Result<RunId> {
            if self.fail_create {
                return Err(AutoflowError::Workflow(format!("workflow '{}' not found", workflow_id)));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Run::new(workflow_id, 1, ExecutionContext::new(options.input.clone()), &options).id)
        }

        async fn execute(
            &self,
            run_id: &str,
        ) -> Result<Run> {
            self.release.notified().await;
            let mut run = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
            run.id = run_id.to_string();
            run.status = RunStatus::Succeeded;
            Ok(run)
        }
    }

    fn store() -> Arc<Store> {
        let store = Store::new();
        MemStore::new().init(&store);
        Arc::new(store)
    }

    async fn settle(
        scheduler: &CronScheduler,
        id: &str,
    ) {
        for _ in 0..100 {
            if !scheduler.is_firing(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("schedule '{}' never settled", id);
    }

    #[tokio::test]
    async fn test_double_run_now_dispatches_once() {
        let launcher = Arc::new(FakeLauncher::default());
        let scheduler = CronScheduler::new(Handle::current(), store(), launcher.clone(), SchedulerOptions::default());
        let trigger = scheduler.create_trigger(ScheduledTrigger::new("wf", "0 0 1 1 *")).unwrap();

        let first = scheduler.run_now(&trigger.id).await.unwrap();
        assert!(matches!(scheduler.run_now(&trigger.id).await, Err(AutoflowError::Schedule(_))));
        assert_eq!(launcher.created.load(Ordering::SeqCst), 1);

        let record = scheduler.get_trigger(&trigger.id).unwrap();
        assert_eq!(record.last_run_status, Some(RunStatus::Pending));
        assert_eq!(record.last_run_id.as_deref(), Some(first.as_str()));

        launcher.release.notify_one();
        settle(&scheduler, &trigger.id).await;
        assert_eq!(scheduler.get_trigger(&trigger.id).unwrap().last_run_status, Some(RunStatus::Succeeded));

        scheduler.run_now(&trigger.id).await.unwrap();
        assert_eq!(launcher.created.load(Ordering::SeqCst), 2);
        launcher.release.notify_one();
    }

    #[tokio::test]
    async fn test_fire_inside_window_records_skip() {
        let launcher = Arc::new(FakeLauncher::default());
        let scheduler = CronScheduler::new(Handle::current(), store(), launcher.clone(), SchedulerOptions::default());
        let mut trigger = ScheduledTrigger::new("wf", "30 12 * * *");
        trigger.maintenance_windows = vec![MaintenanceWindow::new("12:00", "13:00").unwrap()];
        let trigger = scheduler.create_trigger(trigger).unwrap();

        let inside = DateTime::parse_from_rfc3339("2026-02-06T12:30:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(scheduler.fire(&trigger.id, inside, false).await.unwrap(), None);
        let record = scheduler.get_trigger(&trigger.id).unwrap();
        assert_eq!(record.last_skip_reason.as_deref(), Some("inside maintenance window 12:00-13:00"));
        assert_eq!(record.last_run_id, None);
        assert_eq!(launcher.created.load(Ordering::SeqCst), 0);

        let outside = DateTime::parse_from_rfc3339("2026-02-06T14:00:00Z").unwrap().with_timezone(&Utc);
        assert!(scheduler.fire(&trigger.id, outside, false).await.unwrap().is_some());
        assert_eq!(scheduler.get_trigger(&trigger.id).unwrap().last_skip_reason, None);
        launcher.release.notify_one();
    }

    #[tokio::test]
    async fn test_missing_workflow_fails_last_run_status() {
        let launcher = Arc::new(FakeLauncher {
            fail_create: true,
            ..Default::default()
        });
        let scheduler = CronScheduler::new(Handle::current(), store(), launcher, SchedulerOptions::default());
        let trigger = scheduler.create_trigger(ScheduledTrigger::new("ghost", "0 9 * * *")).unwrap();

        assert!(scheduler.run_now(&trigger.id).await.is_err());
        let record = scheduler.get_trigger(&trigger.id).unwrap();
        assert_eq!(record.last_run_status, Some(RunStatus::Failed));
        assert!(record.last_run_error.unwrap().contains("ghost"));
        assert!(!scheduler.is_firing(&trigger.id));
    }

    #[tokio::test]
    async fn test_refresh_arms_and_disarms() {
        let scheduler = CronScheduler::new(Handle::current(), store(), Arc::new(FakeLauncher::default()), SchedulerOptions::default());
        let a = scheduler.create_trigger(ScheduledTrigger::new("wf", "0 9 * * *")).unwrap();
        let mut b = ScheduledTrigger::new("wf", "0 10 * * *");
        b.enabled = false;
        let b = scheduler.create_trigger(b).unwrap();
        assert!(scheduler.armed().is_empty());

        scheduler.start().unwrap();
        assert_eq!(scheduler.armed(), vec![a.id.clone()]);

        let mut enabled = b.clone();
        enabled.enabled = true;
        scheduler.update_trigger(enabled).unwrap();
        let mut expected = vec![a.id.clone(), b.id.clone()];
        expected.sort();
        assert_eq!(scheduler.armed(), expected);

        scheduler.delete_trigger(&a.id).unwrap();
        assert_eq!(scheduler.armed(), vec![b.id.clone()]);

        scheduler.stop();
        assert!(scheduler.armed().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_schedules_are_rejected() {
        let scheduler = CronScheduler::new(Handle::current(), store(), Arc::new(FakeLauncher::default()), SchedulerOptions::default());
        assert!(scheduler.create_trigger(ScheduledTrigger::new("wf", "61 * * * *")).is_err());
        let mut trigger = ScheduledTrigger::new("wf", "* * * * *");
        trigger.timezone = "Atlantis/Central".into();
        assert!(scheduler.create_trigger(trigger).is_err());
        assert!(scheduler.list_triggers().unwrap().is_empty());

        assert_eq!(scheduler.preview("0 * * * *", "UTC", 4).unwrap().len(), 4);
        assert!(scheduler.preview("0 * * *", "UTC", 4).is_err());
    }
}
