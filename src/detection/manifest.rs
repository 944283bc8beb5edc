use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const FALLBACK_THRESHOLD: f32 = 0.80;

fn fallback_threshold() -> f32 {
    FALLBACK_THRESHOLD
}

/// Routing document: detection tag -> ordered template specs and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "fallback_threshold")]
    pub default_threshold: f32,
    #[serde(default)]
    pub types: HashMap<String, TypeSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeSpec {
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Template file name as indexed by the library.
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub when: Option<WhenCondition>,
}

/// Predicate over the capture-source id and the target title.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhenCondition {
    #[serde(default, alias = "rtmp")]
    pub source: Option<String>,
    #[serde(default, alias = "tag")]
    pub title: Option<String>,
    #[serde(default)]
    pub contains: ContainsCondition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainsCondition {
    #[serde(default, alias = "rtmp")]
    pub source: Option<String>,
    #[serde(default, alias = "tag")]
    pub title: Option<String>,
}

/// What the routing predicates are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionContext {
    pub source: String,
    pub title: String,
}

impl DetectionContext {
    pub fn new(source: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
        }
    }
}

impl WhenCondition {
    pub fn matches(&self, ctx: &DetectionContext) -> bool {
        if self.source.as_deref().is_some_and(|s| s != ctx.source) {
            return false;
        }
        if self.title.as_deref().is_some_and(|t| t != ctx.title) {
            return false;
        }
        if self
            .contains
            .source
            .as_deref()
            .is_some_and(|s| !ctx.source.contains(s))
        {
            return false;
        }
        if self
            .contains
            .title
            .as_deref()
            .is_some_and(|t| !ctx.title.contains(t))
        {
            return false;
        }
        true
    }
}

impl TemplateSpec {
    pub fn applies_to(&self, ctx: &DetectionContext) -> bool {
        self.when.as_ref().map_or(true, |cond| cond.matches(ctx))
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    pub fn routed(&self, tag: &str) -> Option<&TypeSpec> {
        self.types.get(tag)
    }

    /// Caller-supplied default when present, otherwise the manifest default.
    pub fn effective_default(&self, caller_default: Option<f32>) -> f32 {
        caller_default.unwrap_or(self.default_threshold)
    }
}

/// Per-template override beats per-type threshold beats the effective default.
pub fn resolve_threshold(spec: &TemplateSpec, type_spec: &TypeSpec, effective_default: f32) -> f32 {
    spec.threshold
        .or(type_spec.threshold)
        .unwrap_or(effective_default)
}
