use serde_json::Value;

/// Equality filters plus paging over a collection's document fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            limit: usize::MAX,
            offset: 0,
        }
    }
}

pub fn q() -> Query {
    Query::default()
}

impl Query {
    pub fn eq(
        mut self,
        field: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn limit(
        mut self,
        limit: usize,
    ) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn offset(
        mut self,
        offset: usize,
    ) -> Self {
        self.offset = offset;
        self
    }
}
