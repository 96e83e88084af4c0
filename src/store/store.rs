use std::{
    any::Any,
    collections::HashMap,
    convert::AsRef,
    sync::{Arc, Mutex, RwLock},
};

use tracing::trace;

use crate::{
    AutoflowError, Result, ShareLock,
    model::WorkflowModel,
    runtime::{Run, RunPatch},
    scheduler::ScheduledTrigger,
    utils,
};

use super::{DbCollection, DbCollectionIden, StoreIden, data, query::q};

#[derive(Clone)]
pub struct DynDbSetRef<T>(Arc<dyn DbCollection<Item = T>>);

/// Typed facade over the registered collections.
///
/// Writes that read-modify-write a record (deploy, run patches, trigger
/// updates) are serialized through `write_lock` so concurrent writers of the
/// same run never interleave.
pub struct Store {
    collections: ShareLock<HashMap<StoreIden, Arc<dyn Any + Send + Sync + 'static>>>,
    write_lock: Mutex<()>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            write_lock: Mutex::new(()),
        }
    }

    pub fn collection<DATA>(&self) -> Arc<dyn DbCollection<Item = DATA>>
    where
        DATA: DbCollectionIden + Send + Sync + 'static,
    {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());

        #[allow(clippy::expect_fun_call)]
        let collection = collections.get(&DATA::iden()).expect(&format!("fail to get collection: {}", DATA::iden().as_ref()));

        #[allow(clippy::expect_fun_call)]
        collection.downcast_ref::<DynDbSetRef<DATA>>().map(|v| v.0.clone()).expect(&format!("fail to get collection: {}", DATA::iden().as_ref()))
    }

    pub fn register<DATA>(
        &self,
        collection: Arc<dyn DbCollection<Item = DATA> + Send + Sync + 'static>,
    ) where
        DATA: DbCollectionIden + 'static,
    {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        collections.insert(DATA::iden(), Arc::new(DynDbSetRef::<DATA>(collection)));
    }

    pub fn workflows(&self) -> Arc<dyn DbCollection<Item = data::Workflow>> {
        self.collection()
    }

    pub fn runs(&self) -> Arc<dyn DbCollection<Item = data::Run>> {
        self.collection()
    }

    pub fn triggers(&self) -> Arc<dyn DbCollection<Item = data::Trigger>> {
        self.collection()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a new version of the workflow and return its version number.
    pub fn deploy(
        &self,
        workflow: &WorkflowModel,
    ) -> Result<u32> {
        trace!("store::deploy({})", workflow.id);
        if workflow.id.is_empty() {
            return Err(AutoflowError::Workflow("missing id in workflow".into()));
        }
        let _guard = self.lock();

        let version = self.latest_version(&workflow.id)?.unwrap_or(0) + 1;
        let mut model = workflow.clone();
        model.version = version;

        self.workflows().create(&data::Workflow {
            id: data::Workflow::key(&model.id, version),
            wid: model.id.clone(),
            version,
            name: model.name.clone(),
            data: model.to_json()?,
            create_time: utils::time::time_millis(),
        })?;
        Ok(version)
    }

    pub fn latest_version(
        &self,
        wid: &str,
    ) -> Result<Option<u32>> {
        let page = self.workflows().query(&q().eq("wid", wid))?;
        Ok(page.rows.iter().map(|w| w.version).max())
    }

    /// Find a deployed definition; `None` selects the latest version.
    pub fn find_workflow(
        &self,
        wid: &str,
        version: Option<u32>,
    ) -> Result<WorkflowModel> {
        let version = match version {
            Some(v) => v,
            None => self.latest_version(wid)?.ok_or_else(|| AutoflowError::Workflow(format!("workflow '{}' not found", wid)))?,
        };
        let record = self.workflows().find(&data::Workflow::key(wid, version)).map_err(|_| AutoflowError::Workflow(format!("workflow '{}' version {} not found", wid, version)))?;
        WorkflowModel::from_json(&record.data)
    }

    /// Delete every version of a workflow together with its runs and triggers.
    pub fn delete_workflow(
        &self,
        wid: &str,
    ) -> Result<bool> {
        let _guard = self.lock();
        let versions = self.workflows().query(&q().eq("wid", wid))?;
        if versions.rows.is_empty() {
            return Ok(false);
        }
        for record in versions.rows {
            self.workflows().delete(&record.id)?;
        }
        for run in self.runs().query(&q().eq("wid", wid))?.rows {
            self.runs().delete(&run.id)?;
        }
        for trigger in self.triggers().query(&q().eq("wid", wid))?.rows {
            self.triggers().delete(&trigger.id)?;
        }
        Ok(true)
    }

    fn run_record(run: &Run) -> Result<data::Run> {
        Ok(data::Run {
            id: run.id.clone(),
            wid: run.workflow_id.clone(),
            version: run.workflow_version,
            status: run.status.as_ref().to_string(),
            data: serde_json::to_string(run)?,
            create_time: run.created_at.timestamp_millis(),
            update_time: utils::time::time_millis(),
        })
    }

    pub fn create_run(
        &self,
        run: &Run,
    ) -> Result<()> {
        trace!("store::create_run({})", run.id);
        self.runs().create(&Self::run_record(run)?)?;
        Ok(())
    }

    pub fn load_run(
        &self,
        id: &str,
    ) -> Result<Run> {
        let record = self.runs().find(id).map_err(|_| AutoflowError::Run(format!("run '{}' not found", id)))?;
        Ok(serde_json::from_str(&record.data)?)
    }

    /// Apply a partial update to a stored run and return the result.
    pub fn save_run_state(
        &self,
        id: &str,
        patch: RunPatch,
    ) -> Result<Run> {
        let _guard = self.lock();
        let mut run = self.load_run(id)?;
        patch.apply(&mut run);
        if !self.runs().update(&Self::run_record(&run)?)? {
            return Err(AutoflowError::Run(format!("run '{}' not found", id)));
        }
        Ok(run)
    }

    /// The exact definition version a run is pinned to.
    pub fn load_workflow_definition(
        &self,
        run_id: &str,
    ) -> Result<WorkflowModel> {
        let record = self.runs().find(run_id).map_err(|_| AutoflowError::Run(format!("run '{}' not found", run_id)))?;
        self.find_workflow(&record.wid, Some(record.version))
    }

    pub fn runs_for_workflow(
        &self,
        wid: &str,
    ) -> Result<Vec<Run>> {
        self.runs().query(&q().eq("wid", wid))?.rows.iter().map(|r| serde_json::from_str(&r.data).map_err(AutoflowError::from)).collect()
    }

    fn trigger_record(trigger: &ScheduledTrigger) -> Result<data::Trigger> {
        Ok(data::Trigger {
            id: trigger.id.clone(),
            wid: trigger.workflow_id.clone(),
            enabled: trigger.enabled,
            data: serde_json::to_string(trigger)?,
            update_time: utils::time::time_millis(),
        })
    }

    pub fn create_trigger(
        &self,
        trigger: &ScheduledTrigger,
    ) -> Result<()> {
        self.triggers().create(&Self::trigger_record(trigger)?)?;
        Ok(())
    }

    pub fn update_trigger(
        &self,
        trigger: &ScheduledTrigger,
    ) -> Result<()> {
        if !self.triggers().update(&Self::trigger_record(trigger)?)? {
            return Err(AutoflowError::Schedule(format!("schedule '{}' not found", trigger.id)));
        }
        Ok(())
    }

    /// Read-modify-write of a trigger under the store's write lock.
    pub fn modify_trigger(
        &self,
        id: &str,
        f: impl FnOnce(&mut ScheduledTrigger),
    ) -> Result<ScheduledTrigger> {
        let _guard = self.lock();
        let mut trigger = self.find_trigger(id)?;
        f(&mut trigger);
        self.update_trigger(&trigger)?;
        Ok(trigger)
    }

    /// Copy the outcome of a scheduled run onto its trigger. Returns `false`
    /// for unscheduled runs, deleted triggers, and triggers a later fire owns.
    pub fn record_trigger_outcome(
        &self,
        run: &Run,
    ) -> Result<bool> {
        let Some(stamp) = &run.trigger else {
            return Ok(false);
        };
        let _guard = self.lock();
        if !self.triggers().exists(&stamp.schedule_id)? {
            return Ok(false);
        }
        let mut trigger = self.find_trigger(&stamp.schedule_id)?;
        if !trigger.record_outcome(&run.id, run.status, run.error.clone()) {
            return Ok(false);
        }
        self.update_trigger(&trigger)?;
        Ok(true)
    }

    pub fn delete_trigger(
        &self,
        id: &str,
    ) -> Result<bool> {
        self.triggers().delete(id)
    }

    pub fn find_trigger(
        &self,
        id: &str,
    ) -> Result<ScheduledTrigger> {
        let record = self.triggers().find(id).map_err(|_| AutoflowError::Schedule(format!("schedule '{}' not found", id)))?;
        Ok(serde_json::from_str(&record.data)?)
    }

    pub fn list_triggers(&self) -> Result<Vec<ScheduledTrigger>> {
        self.triggers().query(&q())?.rows.iter().map(|r| serde_json::from_str(&r.data).map_err(AutoflowError::from)).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::{
        model::NodeModel,
        runtime::{ExecutionContext, RunOptions, RunStatus, TriggerStamp},
        store::{DbStore, MemStore},
    };

    fn store() -> Store {
        let store = Store::new();
        MemStore::new().init(&store);
        store
    }

    fn workflow(id: &str) -> WorkflowModel {
        WorkflowModel {
            id: id.into(),
            nodes: vec![NodeModel::new("a", "start", Value::Null)],
            ..Default::default()
        }
    }

    #[test]
    fn test_deploy_assigns_increasing_versions() {
        let store = store();
        assert_eq!(store.deploy(&workflow("wf")).unwrap(), 1);
        assert_eq!(store.deploy(&workflow("wf")).unwrap(), 2);
        assert_eq!(store.find_workflow("wf", None).unwrap().version, 2);
        assert_eq!(store.find_workflow("wf", Some(1)).unwrap().version, 1);
        assert!(store.find_workflow("other", None).is_err());
    }

    #[test]
    fn test_run_pins_definition_and_patches_apply() {
        let store = store();
        store.deploy(&workflow("wf")).unwrap();
        let run = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
        store.create_run(&run).unwrap();
        store.deploy(&workflow("wf")).unwrap();

        assert_eq!(store.load_workflow_definition(&run.id).unwrap().version, 1);

        let saved = store
            .save_run_state(
                &run.id,
                RunPatch {
                    status: Some(RunStatus::Running),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(saved.status, RunStatus::Running);
        assert_eq!(store.load_run(&run.id).unwrap().status, RunStatus::Running);
        assert!(store.save_run_state("ghost", RunPatch::default()).is_err());
    }

    #[test]
    fn test_delete_workflow_cascades() {
        let store = store();
        store.deploy(&workflow("wf")).unwrap();
        store.deploy(&workflow("keep")).unwrap();
        let run = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
        store.create_run(&run).unwrap();
        let kept = Run::new("keep", 1, ExecutionContext::default(), &RunOptions::default());
        store.create_run(&kept).unwrap();

        let mut trigger = ScheduledTrigger::new("wf", "*/5 * * * *");
        trigger.id = "t1".into();
        store.create_trigger(&trigger).unwrap();

        assert!(store.delete_workflow("wf").unwrap());
        assert!(store.load_run(&run.id).is_err());
        assert!(store.find_trigger("t1").is_err());
        assert!(store.load_run(&kept.id).is_ok());
        assert!(!store.delete_workflow("wf").unwrap());
    }

    #[test]
    fn test_modify_trigger() {
        let store = store();
        let trigger = ScheduledTrigger::new("wf", "0 9 * * *");
        store.create_trigger(&trigger).unwrap();
        let updated = store.modify_trigger(&trigger.id, |t| t.enabled = false).unwrap();
        assert!(!updated.enabled);
        assert_eq!(store.list_triggers().unwrap().len(), 1);
        assert!(!store.list_triggers().unwrap()[0].enabled);
    }

    #[test]
    fn test_record_trigger_outcome() {
        let store = store();
        let mut trigger = ScheduledTrigger::new("wf", "0 9 * * *");
        let options = RunOptions {
            trigger: Some(TriggerStamp {
                schedule_id: trigger.id.clone(),
                schedule_name: trigger.id.clone(),
                timezone: "UTC".into(),
                fired_at: chrono::Utc::now(),
            }),
            ..Default::default()
        };
        let mut run = Run::new("wf", 1, ExecutionContext::default(), &options);
        trigger.last_run_id = Some(run.id.clone());
        trigger.last_run_status = Some(RunStatus::Pending);
        store.create_trigger(&trigger).unwrap();

        run.status = RunStatus::Succeeded;
        assert!(store.record_trigger_outcome(&run).unwrap());
        assert_eq!(store.find_trigger(&trigger.id).unwrap().last_run_status, Some(RunStatus::Succeeded));

        let unscheduled = Run::new("wf", 1, ExecutionContext::default(), &RunOptions::default());
        assert!(!store.record_trigger_outcome(&unscheduled).unwrap());

        store.delete_trigger(&trigger.id).unwrap();
        assert!(!store.record_trigger_outcome(&run).unwrap());
    }
}
