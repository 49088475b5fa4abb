//! Destination readiness: the values and kubeconfig objects the migrated Apps depend on.

use std::fmt;
use std::time::Duration;

use appmig_core::{cluster_values_name, kubeconfig_secret_name, ConfigKind, MigrationError};
use appmig_kubehub::ObjectStore;
use metrics::counter;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::env_u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerequisite {
    pub kind: ConfigKind,
    pub name: String,
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Checked in this order; the first missing one restarts the wait.
pub fn prerequisites(workload_cluster: &str) -> Vec<Prerequisite> {
    vec![
        Prerequisite { kind: ConfigKind::ConfigMap, name: cluster_values_name(workload_cluster) },
        Prerequisite { kind: ConfigKind::Secret, name: cluster_values_name(workload_cluster) },
        Prerequisite { kind: ConfigKind::Secret, name: kubeconfig_secret_name(workload_cluster) },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessGate {
    pub poll_interval: Duration,
    /// `None` waits until cancelled.
    pub timeout: Option<Duration>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(5), timeout: Some(Duration::from_secs(1800)) }
    }
}

impl ReadinessGate {
    /// `APPMIG_POLL_SECS` / `APPMIG_READY_TIMEOUT_SECS` (0 disables the deadline).
    pub fn from_env() -> Self {
        let d = Self::default();
        let timeout = env_u64("APPMIG_READY_TIMEOUT_SECS", d.timeout.map_or(0, |t| t.as_secs()));
        Self {
            poll_interval: Duration::from_secs(env_u64("APPMIG_POLL_SECS", d.poll_interval.as_secs()).max(1)),
            timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
        }
    }

    /// One pass over every prerequisite; never waits.
    pub async fn probe<S>(
        &self,
        store: &S,
        organization_namespace: &str,
        workload_cluster: &str,
    ) -> Result<Vec<(Prerequisite, bool)>, MigrationError>
    where
        S: ObjectStore + ?Sized,
    {
        let mut out = Vec::with_capacity(3);
        for p in prerequisites(workload_cluster) {
            let present = check(store, organization_namespace, &p).await?;
            out.push((p, present));
        }
        Ok(out)
    }

    /// Block until every prerequisite exists in `organization_namespace`.
    pub async fn await_ready<S>(
        &self,
        store: &S,
        organization_namespace: &str,
        workload_cluster: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError>
    where
        S: ObjectStore + ?Sized,
    {
        let started = Instant::now();
        // Deadlines past the clock's range behave like no deadline.
        let deadline = self.timeout.and_then(|t| started.checked_add(t));
        let required = prerequisites(workload_cluster);
        loop {
            counter!("readiness_polls", 1u64);
            let mut missing = None;
            for p in &required {
                if !check(store, organization_namespace, p).await? {
                    missing = Some(p);
                    break;
                }
            }
            let Some(missing) = missing else {
                info!(wc = %workload_cluster, ns = %organization_namespace, waited = ?started.elapsed(), "destination ready");
                return Ok(());
            };
            debug!(%missing, ns = %organization_namespace, "waiting for prerequisite");

            let mut pause = self.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(MigrationError::ReadinessTimeout {
                        waited: now.duration_since(started),
                        missing: format!("{} in {}", missing, organization_namespace),
                    });
                }
                pause = pause.min(deadline - now);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(MigrationError::Cancelled(format!("waiting for {}", missing)));
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

async fn check<S>(store: &S, namespace: &str, p: &Prerequisite) -> Result<bool, MigrationError>
where
    S: ObjectStore + ?Sized,
{
    store.exists(p.kind, namespace, &p.name).await.map_err(|source| MigrationError::ReadinessCheck {
        object: format!("{}/{}", namespace, p),
        source,
    })
}
