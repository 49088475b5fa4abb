//! App migration eligibility filter: decides which Apps of a workload cluster get migrated.

#![forbid(unsafe_code)]

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use appmig_core::{ApplicationDescriptor, MigrationError};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Exclusion rules, evaluated in field order; the first match wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterRules {
    /// Catalogs whose apps are pre-installed on every cluster.
    pub excluded_catalogs: Vec<String>,
    /// Substring a label key must contain to mark a managed child app.
    pub managed_by_key: String,
    /// Substrings of that label's value naming bundle/operator parents.
    pub managed_by_values: Vec<String>,
    /// App names (`spec.name`) unsupported on the destination.
    pub denied_apps: Vec<String>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            excluded_catalogs: vec!["default".into()],
            managed_by_key: "managed-by".into(),
            managed_by_values: vec!["bundle".into(), "operator".into()],
            denied_apps: vec!["k8s-initiator-app".into(), "k8s-initiator-app-cgroupsv1".into()],
        }
    }
}

impl FilterRules {
    /// Missing fields fall back to the built-in defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("parsing filter rules")
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text)
    }
}

/// Why an App was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    Catalog(String),
    ManagedBy { key: String, value: String },
    Denied(String),
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::Catalog(c) => write!(f, "catalog {:?} is installed by default", c),
            Exclusion::ManagedBy { key, value } => write!(f, "managed by parent ({}={})", key, value),
            Exclusion::Denied(n) => write!(f, "app {:?} is not supported on the destination", n),
        }
    }
}

pub fn classify(rules: &FilterRules, app: &ApplicationDescriptor) -> Option<Exclusion> {
    if rules.excluded_catalogs.iter().any(|c| *c == app.catalog_name) {
        return Some(Exclusion::Catalog(app.catalog_name.clone()));
    }
    let managed = app.labels.iter().find(|(k, v)| {
        k.contains(rules.managed_by_key.as_str()) && rules.managed_by_values.iter().any(|m| v.contains(m.as_str()))
    });
    if let Some((k, v)) = managed {
        return Some(Exclusion::ManagedBy { key: k.clone(), value: v.clone() });
    }
    if rules.denied_apps.iter().any(|d| *d == app.display_name) {
        return Some(Exclusion::Denied(app.display_name.clone()));
    }
    None
}

/// Keep eligible Apps in their original order. Nothing left is `EmptyResult`.
pub fn filter(rules: &FilterRules, apps: Vec<ApplicationDescriptor>) -> Result<Vec<ApplicationDescriptor>, MigrationError> {
    let total = apps.len();
    let kept: Vec<_> = apps
        .into_iter()
        .filter(|app| match classify(rules, app) {
            Some(why) => {
                debug!(app = %app.name, reason = %why, "excluded from migration");
                counter!("filter_excluded", 1u64);
                false
            }
            None => true,
        })
        .collect();
    info!(total, eligible = kept.len(), "filtered apps");
    if kept.is_empty() {
        return Err(MigrationError::EmptyResult);
    }
    Ok(kept)
}
