use std::collections::HashMap;

use serde_json::{Value as JsonValue, json};

use crate::{
    Result,
    store::{data::Trigger, db::mem::DbDocument},
};

impl DbDocument for Trigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn doc(&self) -> Result<HashMap<String, JsonValue>> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), json!(self.id.clone()));
        map.insert("wid".to_string(), json!(self.wid.clone()));
        map.insert("enabled".to_string(), json!(self.enabled));
        map.insert("update_time".to_string(), json!(self.update_time));
        Ok(map)
    }
}
