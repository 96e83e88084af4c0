//! Storage layer for workflow definitions, runs and schedules.
//!
//! Records live in typed collections registered with the [`Store`] facade by
//! a [`DbStore`] backend. The in-memory backend is `MemStore`; other backends
//! plug in by registering their own [`DbCollection`]s.

pub mod data;
mod db;
pub mod query;
mod store;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter};

use crate::Result;

use query::*;

pub use db::MemStore;
pub use store::Store;

/// Identifiers for different storage collections.
#[derive(Debug, Clone, AsRefStr, PartialEq, Hash, Eq, EnumIter)]
pub enum StoreIden {
    /// Deployed workflow definitions, one record per version.
    #[strum(serialize = "workflows")]
    Workflows,
    /// Run instances.
    #[strum(serialize = "runs")]
    Runs,
    /// Cron triggers.
    #[strum(serialize = "triggers")]
    Triggers,
}

/// One page of a collection query.
#[derive(Debug, Deserialize, Serialize)]
pub struct PageData<T> {
    /// matches across all pages
    pub count: usize,
    /// 1-based
    pub page_num: usize,
    pub page_count: usize,
    pub page_size: usize,
    pub rows: Vec<T>,
}

/// Record types name the collection they are stored in.
pub trait DbCollectionIden {
    fn iden() -> StoreIden;
}

/// CRUD over one record type. Ids are unique within a collection.
pub trait DbCollection: Send + Sync {
    type Item;

    fn exists(
        &self,
        id: &str,
    ) -> Result<bool>;

    /// Errors when no record has `id`.
    fn find(
        &self,
        id: &str,
    ) -> Result<Self::Item>;

    /// Filtered, ordered and paged by `query`.
    fn query(
        &self,
        query: &Query,
    ) -> Result<PageData<Self::Item>>;

    fn create(
        &self,
        data: &Self::Item,
    ) -> Result<bool>;

    /// Replaces the record with the same id.
    fn update(
        &self,
        data: &Self::Item,
    ) -> Result<bool>;

    fn delete(
        &self,
        id: &str,
    ) -> Result<bool>;
}

/// A storage backend.
pub trait DbStore {
    /// Register one collection per [`StoreIden`] with `s`.
    fn init(
        &self,
        s: &Store,
    );
}
