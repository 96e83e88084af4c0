use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{common::Vars, runtime::RunId, workflow::node::NodeId};

/// Shared key/value state of one run.
///
/// Owned by the execution loop for the duration of an invocation; actions get a
/// `&mut` borrow one at a time. Two namespaces are reserved next to the user
/// bag: granted approvals and the per-node uniqueness cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    vars: Vars,
    #[serde(rename = "__approvals", default)]
    approvals: HashMap<NodeId, bool>,
    #[serde(rename = "__unique", default)]
    unique: HashMap<NodeId, BTreeSet<String>>,
}

impl ExecutionContext {
    pub fn new(vars: Vars) -> Self {
        Self {
            vars,
            ..Default::default()
        }
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.vars.get_value(key)
    }

    /// Dotted-path read into the bag.
    pub fn lookup(
        &self,
        path: &str,
    ) -> Option<&Value> {
        self.vars.lookup(path)
    }

    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<Value>,
    ) {
        self.vars.set(key, value);
    }

    pub fn merge(
        &mut self,
        vars: Vars,
    ) {
        self.vars.extend(vars);
    }

    pub fn is_approved(
        &self,
        nid: &str,
    ) -> bool {
        self.approvals.get(nid).copied().unwrap_or(false)
    }

    pub fn approve(
        &mut self,
        nid: &str,
    ) {
        self.approvals.insert(nid.to_string(), true);
    }

    /// Record `key` in the node's uniqueness cache. Returns `false` when the
    /// node has already seen it.
    pub fn claim_unique(
        &mut self,
        nid: &str,
        key: &str,
    ) -> bool {
        self.unique.entry(nid.to_string()).or_default().insert(key.to_string())
    }
}

/// Read-only facts about the run an action executes in.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub run_id: RunId,
    pub workflow_id: String,
    pub test_mode: bool,
}
