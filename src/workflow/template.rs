//! `{{path.to.var}}` and `{{secret:KEY}}` interpolation.
//!
//! Resolution never fails: unknown variables and missing secrets render as the
//! empty string. A string consisting of a single variable placeholder is
//! replaced by the variable's JSON value, so numbers and objects keep their type.

use std::{collections::HashMap, sync::LazyLock};

use regex::{Captures, Regex};
use serde_json::Value;

use crate::runtime::ExecutionContext;

const SECRET_PREFIX: &str = "secret:";

static TEMPLATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("template pattern"));

/// Source of `{{secret:KEY}}` values.
pub trait SecretProvider: Send + Sync {
    fn get(
        &self,
        key: &str,
    ) -> Option<String>;
}

/// Secrets read from process environment variables, optionally prefixed.
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets {
    prefix: String,
}

impl EnvSecrets {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl SecretProvider for EnvSecrets {
    fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, key)).ok()
    }
}

/// Fixed in-memory secrets.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets(HashMap<String, String>);

impl SecretProvider for StaticSecrets {
    fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        self.0.get(key).cloned()
    }
}

impl<const N: usize> From<[(String, String); N]> for StaticSecrets {
    fn from(entries: [(String, String); N]) -> Self {
        Self(HashMap::from(entries))
    }
}

impl FromIterator<(String, String)> for StaticSecrets {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn resolve_token(
    token: &str,
    ctx: &ExecutionContext,
    secrets: &dyn SecretProvider,
) -> String {
    match token.strip_prefix(SECRET_PREFIX) {
        Some(key) => secrets.get(key.trim()).unwrap_or_default(),
        None => ctx.lookup(token).map(stringify).unwrap_or_default(),
    }
}

/// Interpolate every placeholder in `template`.
pub fn render(
    template: &str,
    ctx: &ExecutionContext,
    secrets: &dyn SecretProvider,
) -> String {
    TEMPLATE_PATTERN.replace_all(template, |caps: &Captures| resolve_token(&caps[1], ctx, secrets)).into_owned()
}

/// Interpolate every string inside `value`, recursively.
pub fn render_value(
    value: &Value,
    ctx: &ExecutionContext,
    secrets: &dyn SecretProvider,
) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = TEMPLATE_PATTERN.captures(s) {
                let whole = caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len());
                let token = &caps[1];
                if whole && !token.starts_with(SECRET_PREFIX) {
                    return ctx.lookup(token).cloned().unwrap_or_else(|| Value::String(String::new()));
                }
            }
            Value::String(render(s, ctx, secrets))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, ctx, secrets)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), render_value(v, ctx, secrets))).collect()),
        other => other.clone(),
    }
}
