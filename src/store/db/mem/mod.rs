mod collect;
mod r#impl;

use std::{collections::HashMap, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use crate::{
    Result,
    store::{DbCollection, DbStore, Store, data::*},
};
pub use collect::Collect;

/// In-memory backend. Nothing survives the process.
#[derive(Debug, Clone)]
pub struct MemStore {
    workflows: Arc<Collect<Workflow>>,
    runs: Arc<Collect<Run>>,
    triggers: Arc<Collect<Trigger>>,
}

trait DbDocument: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
    fn doc(&self) -> Result<HashMap<String, JsonValue>>;
}

impl DbStore for MemStore {
    fn init(
        &self,
        s: &Store,
    ) {
        s.register(self.workflows());
        s.register(self.runs());
        s.register(self.triggers());
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            workflows: Arc::new(Collect::new("workflows")),
            runs: Arc::new(Collect::new("runs")),
            triggers: Arc::new(Collect::new("triggers")),
        }
    }

    pub fn workflows(&self) -> Arc<dyn DbCollection<Item = Workflow> + Send + Sync> {
        self.workflows.clone()
    }

    pub fn runs(&self) -> Arc<dyn DbCollection<Item = Run> + Send + Sync> {
        self.runs.clone()
    }

    pub fn triggers(&self) -> Arc<dyn DbCollection<Item = Trigger> + Send + Sync> {
        self.triggers.clone()
    }
}
