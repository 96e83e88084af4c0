use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeModel {
    pub source: String,
    pub target: String,
}

impl EdgeModel {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}
