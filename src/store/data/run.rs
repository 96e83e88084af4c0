use serde::{Deserialize, Serialize};

use crate::store::{DbCollectionIden, StoreIden};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Run {
    pub id: String,
    pub wid: String,
    pub version: u32,
    pub status: String,
    /// serialized `runtime::Run`
    pub data: String,
    pub create_time: i64,
    pub update_time: i64,
}

impl DbCollectionIden for Run {
    fn iden() -> StoreIden {
        StoreIden::Runs
    }
}
