//! App migration apply: waits for the destination to converge, then applies the migration file as one unit.

#![forbid(unsafe_code)]

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use appmig_core::{is_empty_payload, MigrationError};
use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

mod ready;
mod ssa;

pub use ready::{prerequisites, Prerequisite, ReadinessGate};
pub use ssa::{split_documents, ServerSideApplier, FIELD_MANAGER};

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(default)
}

/// Fixed-count retry with a constant delay: one initial attempt plus up to `max_retries` more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 15, delay: Duration::from_secs(3) }
    }
}

impl RetryPolicy {
    /// `APPMIG_RETRY_MAX` / `APPMIG_RETRY_DELAY_SECS`, falling back to 15 retries every 3s.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_retries: env_u64("APPMIG_RETRY_MAX", d.max_retries as u64).min(u32::MAX as u64) as u32,
            delay: Duration::from_secs(env_u64("APPMIG_RETRY_DELAY_SECS", d.delay.as_secs())),
        }
    }

    fn attempts(&self) -> u32 { self.max_retries.saturating_add(1) }
}

/// Submits a whole document stream to the destination.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    async fn apply(&self, payload: &[u8]) -> Result<()>;
}

/// Apply `payload` as a unit, retrying the whole set on failure.
pub async fn apply_with_retry<A>(applier: &A, policy: &RetryPolicy, payload: &[u8]) -> Result<(), MigrationError>
where
    A: ManifestApplier + ?Sized,
{
    if is_empty_payload(payload) {
        return Err(MigrationError::EmptyMigration);
    }
    let attempts = policy.attempts();
    let mut last = None;
    for attempt in 1..=attempts {
        counter!("apply_attempts", 1u64);
        let t0 = std::time::Instant::now();
        match applier.apply(payload).await {
            Ok(()) => {
                histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                counter!("apply_ok", 1u64);
                info!(attempt, bytes = payload.len(), "migration applied");
                return Ok(());
            }
            Err(e) => {
                counter!("apply_err", 1u64);
                warn!(attempt, max_attempts = attempts, error = %format!("{:#}", e), "apply failed");
                last = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
    Err(MigrationError::ApplyExhausted {
        attempts,
        source: last.unwrap_or_else(|| anyhow!("no apply attempt was made")),
    })
}

/// Delegates to `kubectl --context <ctx> apply -f -`.
#[derive(Debug, Clone)]
pub struct KubectlApplier {
    program: String,
    context: String,
}

impl KubectlApplier {
    pub fn new(context: impl Into<String>) -> Self {
        Self { program: "kubectl".into(), context: context.into() }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn context(&self) -> &str { &self.context }

    fn args(&self) -> [&str; 5] { ["--context", &self.context, "apply", "-f", "-"] }
}

#[async_trait]
impl ManifestApplier for KubectlApplier {
    async fn apply(&self, payload: &[u8]) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.program))?;
        if let Some(mut stdin) = child.stdin.take() {
            // An early exit closes the pipe; the exit status below carries the failure.
            if let Err(e) = stdin.write_all(payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e).with_context(|| format!("writing manifests to {}", self.program));
                }
            }
        }
        let out = child.wait_with_output().await.with_context(|| format!("waiting for {}", self.program))?;
        for line in String::from_utf8_lossy(&out.stdout).lines() {
            info!(context = %self.context, "{}", line);
        }
        if !out.status.success() {
            bail!("{} apply against context {} exited with {}", self.program, self.context, out.status);
        }
        Ok(())
    }
}
