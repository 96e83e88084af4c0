use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Ordered JSON key/value bag.
///
/// Backs the shared run context and action outputs. Keys may be looked up
/// with dotted paths (`user.address.city`) through [`Vars::lookup`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars {
    inner: Map<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read of a top-level key; `None` when absent or of another shape.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Option<T> {
        self.inner.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_value(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.inner.get(key)
    }

    /// Resolve a dotted path. Numeric segments index into arrays.
    pub fn lookup(
        &self,
        path: &str,
    ) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.inner.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn set<V: Into<Value>>(
        &mut self,
        key: &str,
        value: V,
    ) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn insert(
        &mut self,
        key: String,
        value: Value,
    ) -> Option<Value> {
        self.inner.insert(key, value)
    }

    pub fn remove(
        &mut self,
        key: &str,
    ) -> Option<Value> {
        self.inner.remove(key)
    }

    pub fn contains_key(
        &self,
        key: &str,
    ) -> bool {
        self.inner.contains_key(key)
    }

    /// Shallow merge: keys from `other` overwrite existing keys.
    pub fn extend(
        &mut self,
        other: Vars,
    ) {
        self.inner.extend(other.inner);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<Value> for Vars {
    /// Objects become the bag; any other value is stored under `value`.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(inner) => Self {
                inner,
            },
            Value::Null => Self::new(),
            other => {
                let mut vars = Self::new();
                vars.set("value", other);
                vars
            }
        }
    }
}

impl From<Vars> for Value {
    fn from(vars: Vars) -> Self {
        Value::Object(vars.inner)
    }
}
