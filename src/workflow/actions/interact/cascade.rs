//! Ordered fallback resolution of an interaction target.
//!
//! A node may describe its target several ways. Descriptors are tried in a
//! fixed order: explicit selector list, test id, accessible label, role and
//! name, raw selector, xpath. The first one the surface accepts wins. When all
//! fail, the surface is asked for nearby addressable elements and a single
//! suggestion is appended to the collected errors.

use std::{collections::HashSet, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AutoflowError, Result};

use super::InteractConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum TargetCandidate {
    Css { value: String },
    TestId { value: String },
    Label { value: String },
    Role { role: String, name: Option<String> },
    Selector { value: String },
    Xpath { value: String },
}

impl fmt::Display for TargetCandidate {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            TargetCandidate::Css { value } => write!(f, "css {:?}", value),
            TargetCandidate::TestId { value } => write!(f, "test_id {:?}", value),
            TargetCandidate::Label { value } => write!(f, "label {:?}", value),
            TargetCandidate::Role { role, name: Some(name) } => write!(f, "role {:?} name {:?}", role, name),
            TargetCandidate::Role { role, name: None } => write!(f, "role {:?}", role),
            TargetCandidate::Selector { value } => write!(f, "selector {:?}", value),
            TargetCandidate::Xpath { value } => write!(f, "xpath {:?}", value),
        }
    }
}

impl TargetCandidate {
    fn terms(&self) -> Vec<&str> {
        match self {
            TargetCandidate::Css { value }
            | TargetCandidate::TestId { value }
            | TargetCandidate::Label { value }
            | TargetCandidate::Selector { value }
            | TargetCandidate::Xpath { value } => vec![value.as_str()],
            TargetCandidate::Role { role, name } => {
                let mut terms = vec![role.as_str()];
                terms.extend(name.as_deref());
                terms
            }
        }
    }
}

/// What to do with a resolved target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOp<'a> {
    Click,
    Fill(&'a str),
}

/// An addressable element reported by the surface for suggestions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceElement {
    pub test_id: Option<String>,
    pub label: Option<String>,
    pub text: Option<String>,
}

/// A live interaction surface (browser page, desktop window) bound to one run.
#[async_trait]
pub trait TargetSurface: Send + Sync {
    /// Locate `target` and apply `op`. The error string explains why the target was not usable.
    async fn perform(
        &self,
        target: &TargetCandidate,
        op: TargetOp<'_>,
    ) -> std::result::Result<(), String>;

    /// Addressable elements currently visible.
    async fn nearby(&self) -> Vec<SurfaceElement>;

    /// Evidence captured on failure.
    async fn snapshot(&self) -> Option<Value> {
        None
    }

    async fn close(&self) {}
}

/// Candidates in resolution order.
pub fn candidates(config: &InteractConfig) -> Vec<TargetCandidate> {
    let mut out: Vec<TargetCandidate> = config
        .selectors
        .iter()
        .map(|s| TargetCandidate::Css {
            value: s.clone(),
        })
        .collect();
    if let Some(value) = &config.test_id {
        out.push(TargetCandidate::TestId {
            value: value.clone(),
        });
    }
    if let Some(value) = &config.label {
        out.push(TargetCandidate::Label {
            value: value.clone(),
        });
    }
    if let Some(role) = &config.role {
        out.push(TargetCandidate::Role {
            role: role.clone(),
            name: config.name.clone(),
        });
    }
    if let Some(value) = &config.selector {
        out.push(TargetCandidate::Selector {
            value: value.clone(),
        });
    }
    if let Some(value) = &config.xpath {
        out.push(TargetCandidate::Xpath {
            value: value.clone(),
        });
    }
    out
}

/// Try every candidate in order; return the one that succeeded.
pub async fn resolve(
    surface: &dyn TargetSurface,
    candidates: &[TargetCandidate],
    op: TargetOp<'_>,
) -> Result<TargetCandidate> {
    if candidates.is_empty() {
        return Err(AutoflowError::Action("no target descriptor configured".to_string()));
    }

    let mut failures = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match surface.perform(candidate, op).await {
            Ok(()) => return Ok(candidate.clone()),
            Err(reason) => {
                tracing::debug!(target_candidate = %candidate, %reason, "target candidate failed");
                failures.push(format!("{}: {}", candidate, reason));
            }
        }
    }

    let suggestion = match suggest(candidates, &surface.nearby().await) {
        Some(hint) => format!("suggestion: try {}", hint),
        None => "suggestion: no addressable elements nearby".to_string(),
    };
    failures.push(suggestion);
    Err(AutoflowError::Action(format!("target not found: {}", failures.join("; "))))
}

fn tokens(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(str::to_lowercase).collect()
}

/// Best nearby element by token overlap with the failed descriptors.
/// Ties prefer test ids, then labels, then visible text, then surface order.
pub fn suggest(
    candidates: &[TargetCandidate],
    nearby: &[SurfaceElement],
) -> Option<String> {
    let wanted: HashSet<String> = candidates.iter().flat_map(|c| c.terms()).flat_map(tokens).collect();

    let mut best: Option<((usize, usize), String)> = None;
    for element in nearby {
        let addresses = [
            (2, element.test_id.clone().map(|value| TargetCandidate::TestId { value })),
            (1, element.label.clone().map(|value| TargetCandidate::Label { value })),
            (0, element.text.clone().map(|text| TargetCandidate::Selector { value: format!("text={}", text) })),
        ];
        for (priority, address) in addresses {
            let Some(address) = address else {
                continue;
            };
            let overlap = address.terms().into_iter().flat_map(tokens).filter(|t| wanted.contains(t)).count();
            let score = (overlap, priority);
            if best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, address.to_string()));
            }
        }
    }
    best.map(|(_, hint)| hint)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct FakeSurface {
        accepts: Option<TargetCandidate>,
        tried: Mutex<Vec<TargetCandidate>>,
        nearby: Vec<SurfaceElement>,
    }

    #[async_trait]
    impl TargetSurface for FakeSurface {
        async fn perform(
            &self,
            target: &TargetCandidate,
            _op: TargetOp<'_>,
        ) -> std::result::Result<(), String> {
            self.tried.lock().unwrap().push(target.clone());
            if self.accepts.as_ref() == Some(target) { Ok(()) } else { Err("no element matched".to_string()) }
        }

        async fn nearby(&self) -> Vec<SurfaceElement> {
            self.nearby.clone()
        }
    }

    fn css(value: &str) -> TargetCandidate {
        TargetCandidate::Css {
            value: value.to_string(),
        }
    }

    #[test]
    fn test_candidate_order() {
        let config = InteractConfig {
            selectors: vec!["#a".into()],
            test_id: Some("tid".into()),
            label: Some("Email".into()),
            role: Some("button".into()),
            name: Some("Save".into()),
            selector: Some("div > a".into()),
            xpath: Some("//a".into()),
            value: None,
        };
        let kinds: Vec<String> = candidates(&config).iter().map(|c| c.to_string()).collect();
        assert_eq!(
            kinds,
            vec![
                r##"css "#a""##,
                r#"test_id "tid""#,
                r#"label "Email""#,
                r#"role "button" name "Save""#,
                r#"selector "div > a""#,
                r#"xpath "//a""#,
            ]
        );
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let surface = FakeSurface {
            accepts: Some(css(".btn")),
            tried: Mutex::new(Vec::new()),
            nearby: Vec::new(),
        };
        let resolved = resolve(&surface, &[css("#one"), css(".btn"), css(".never")], TargetOp::Click).await.unwrap();
        assert_eq!(resolved, css(".btn"));
        assert_eq!(*surface.tried.lock().unwrap(), vec![css("#one"), css(".btn")]);
    }

    #[tokio::test]
    async fn test_total_failure_reports_every_reason_and_a_suggestion() {
        let surface = FakeSurface {
            accepts: None,
            tried: Mutex::new(Vec::new()),
            nearby: vec![
                SurfaceElement {
                    text: Some("Cancel".into()),
                    ..Default::default()
                },
                SurfaceElement {
                    test_id: Some("submit-btn".into()),
                    label: Some("Submit order".into()),
                    ..Default::default()
                },
            ],
        };
        let err = resolve(&surface, &[css("#one"), css(".btn")], TargetOp::Click).await.unwrap_err().to_string();

        assert_eq!(*surface.tried.lock().unwrap(), vec![css("#one"), css(".btn")]);
        let one = err.find(r##"css "#one": no element matched"##).unwrap();
        let btn = err.find(r#"css ".btn": no element matched"#).unwrap();
        assert!(one < btn);
        assert!(err.contains(r#"suggestion: try test_id "submit-btn""#), "{}", err);
    }

    #[tokio::test]
    async fn test_empty_surface_still_reports() {
        let surface = FakeSurface {
            accepts: None,
            tried: Mutex::new(Vec::new()),
            nearby: Vec::new(),
        };
        let err = resolve(&surface, &[css("#one")], TargetOp::Fill("x")).await.unwrap_err().to_string();
        assert!(err.contains("no addressable elements nearby"));
        assert!(resolve(&surface, &[], TargetOp::Click).await.is_err());
    }

    #[test]
    fn test_suggestion_prefers_overlap() {
        let nearby = vec![
            SurfaceElement {
                test_id: Some("nav-home".into()),
                ..Default::default()
            },
            SurfaceElement {
                label: Some("Email address".into()),
                ..Default::default()
            },
        ];
        let hint = suggest(
            &[TargetCandidate::Label {
                value: "email".into(),
            }],
            &nearby,
        );
        assert_eq!(hint.as_deref(), Some(r#"label "Email address""#));
    }
}
