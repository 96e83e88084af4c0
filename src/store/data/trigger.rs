use serde::{Deserialize, Serialize};

use crate::store::{DbCollectionIden, StoreIden};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Trigger {
    pub id: String,
    pub wid: String,
    pub enabled: bool,
    /// serialized `ScheduledTrigger`
    pub data: String,
    pub update_time: i64,
}

impl DbCollectionIden for Trigger {
    fn iden() -> StoreIden {
        StoreIden::Triggers
    }
}
