use std::time::Duration;

use thiserror::Error;

/// Failures of a single object store read.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound { kind: String, namespace: String, name: String },
    #[error("unsupported resource kind: {0}")]
    UnsupportedKind(String),
    #[error("cannot decode {what}: {reason}")]
    Decode { what: String, reason: String },
    #[error("store access failed: {0:#}")]
    Access(#[source] anyhow::Error),
}

impl StoreError {
    pub fn not_found(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        StoreError::NotFound { kind: kind.into(), namespace: namespace.into(), name: name.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Everything a migration run can end with besides success.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("no apps eligible for migration")]
    EmptyResult,
    #[error("transforming app {app}: {source}")]
    Transform {
        app: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("readiness check of {object} failed: {source}")]
    ReadinessCheck {
        object: String,
        #[source]
        source: StoreError,
    },
    #[error("prerequisites not ready after {waited:?}; still missing {missing}")]
    ReadinessTimeout { waited: Duration, missing: String },
    #[error("cancelled while {0}")]
    Cancelled(String),
    #[error("apply failed after {attempts} attempt(s): {source:#}")]
    ApplyExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("migration payload is empty; nothing to migrate")]
    EmptyMigration,
}

impl MigrationError {
    /// "Nothing to do" outcomes: callers warn and terminate cleanly.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MigrationError::EmptyResult | MigrationError::EmptyMigration)
    }

    pub fn transform(app: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        MigrationError::Transform { app: app.into(), source: source.into() }
    }
}
