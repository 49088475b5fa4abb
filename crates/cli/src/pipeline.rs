//! Store-agnostic bodies of the subcommands.

use std::fmt;

use anyhow::{Context, Result};
use appmig_apply::{apply_with_retry, ManifestApplier, Prerequisite, ReadinessGate, RetryPolicy};
use appmig_core::{is_empty_payload, render_stream, MigrationError};
use appmig_filter::{classify, filter, Exclusion, FilterRules};
use appmig_kubehub::ObjectStore;
use appmig_transform::{transform, MigrationContext};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Filter and transform the Apps of `workload_cluster` into one document stream.
///
/// Apps of a workload cluster live in the namespace named after it on the source.
pub async fn prepare_stream(
    source: &dyn ObjectStore,
    rules: &FilterRules,
    workload_cluster: &str,
    organization_namespace: &str,
) -> Result<Vec<u8>> {
    let ctx = MigrationContext::new(workload_cluster, organization_namespace, source)?;
    let apps = source
        .list_apps(workload_cluster)
        .await
        .with_context(|| format!("listing apps in namespace {}", workload_cluster))?;
    let eligible = filter(rules, apps)?;
    let objects = transform(&ctx, &eligible).await?;
    Ok(render_stream(&objects))
}

/// Readiness gate, then the retryable apply. Empty payloads never wait.
#[allow(clippy::too_many_arguments)]
pub async fn apply_stream<S, A>(
    destination: &S,
    applier: &A,
    gate: &ReadinessGate,
    policy: &RetryPolicy,
    payload: &[u8],
    organization_namespace: &str,
    workload_cluster: &str,
    cancel: &CancellationToken,
) -> Result<(), MigrationError>
where
    S: ObjectStore + ?Sized,
    A: ManifestApplier + ?Sized,
{
    if is_empty_payload(payload) {
        return Err(MigrationError::EmptyMigration);
    }
    info!(wc = %workload_cluster, ns = %organization_namespace, "waiting for destination prerequisites");
    gate.await_ready(destination, organization_namespace, workload_cluster, cancel).await?;
    apply_with_retry(applier, policy, payload).await
}

#[derive(Debug, Default)]
pub struct PreflightReport {
    pub eligible: Vec<String>,
    pub excluded: Vec<(String, Exclusion)>,
    /// Empty when no organization namespace was given.
    pub prerequisites: Vec<(Prerequisite, bool)>,
}

impl PreflightReport {
    pub fn is_ready(&self) -> bool {
        !self.eligible.is_empty() && self.prerequisites.iter().all(|(_, ok)| *ok)
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "eligible apps: {}", self.eligible.len())?;
        for name in &self.eligible {
            writeln!(f, "  + {}", name)?;
        }
        for (name, why) in &self.excluded {
            writeln!(f, "  - {} ({})", name, why)?;
        }
        for (p, ok) in &self.prerequisites {
            writeln!(f, "{:<8} {}", if *ok { "present" } else { "missing" }, p)?;
        }
        Ok(())
    }
}

/// Read-only look at what `prepare` and `apply` would find.
pub async fn preflight<S, D>(
    source: &S,
    destination: Option<(&D, &str)>,
    gate: &ReadinessGate,
    rules: &FilterRules,
    workload_cluster: &str,
) -> Result<PreflightReport>
where
    S: ObjectStore + ?Sized,
    D: ObjectStore + ?Sized,
{
    let apps = source
        .list_apps(workload_cluster)
        .await
        .with_context(|| format!("listing apps in namespace {}", workload_cluster))?;
    let mut report = PreflightReport::default();
    for app in apps {
        match classify(rules, &app) {
            Some(why) => report.excluded.push((app.name, why)),
            None => report.eligible.push(app.name),
        }
    }
    if let Some((dest, org_ns)) = destination {
        report.prerequisites = gate.probe(dest, org_ns, workload_cluster).await?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use appmig_core::{ApplicationDescriptor, ConfigKind, RawObject};
    use appmig_kubehub::MemoryStore;
    use async_trait::async_trait;

    use super::*;

    const ORG_NS: &str = "org-acme";

    #[derive(Default)]
    struct CountingApplier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ManifestApplier for CountingApplier {
        async fn apply(&self, _payload: &[u8]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn app(name: &str, catalog: &str) -> ApplicationDescriptor {
        ApplicationDescriptor {
            name: name.into(),
            namespace: "wc1".into(),
            display_name: name.into(),
            catalog_name: catalog.into(),
            version: "1.0.0".into(),
            target_namespace: name.into(),
            ..Default::default()
        }
    }

    fn ready_destination() -> MemoryStore {
        let store = MemoryStore::new();
        for (kind, name) in [
            (ConfigKind::ConfigMap, "wc1-cluster-values"),
            (ConfigKind::Secret, "wc1-cluster-values"),
            (ConfigKind::Secret, "wc1-kubeconfig"),
        ] {
            store.insert_object(kind, RawObject { name: name.into(), namespace: ORG_NS.into(), ..Default::default() });
        }
        store
    }

    fn fast_gate() -> ReadinessGate {
        ReadinessGate { poll_interval: Duration::from_secs(5), timeout: Some(Duration::from_secs(20)) }
    }

    #[tokio::test]
    async fn prepare_renders_eligible_apps_only() {
        let source = MemoryStore::with_apps(vec![app("loki", "giantswarm"), app("coredns", "default")]);
        let stream = prepare_stream(&source, &FilterRules::default(), "wc1", ORG_NS).await.unwrap();
        let text = String::from_utf8(stream).unwrap();
        assert!(text.contains("name: wc1-loki"), "{}", text);
        assert!(!text.contains("coredns"), "{}", text);
        assert!(text.ends_with("---\n"));
    }

    #[tokio::test]
    async fn prepare_with_nothing_eligible_is_recoverable() {
        let source = MemoryStore::with_apps(vec![app("coredns", "default")]);
        let err = prepare_stream(&source, &FilterRules::default(), "wc1", ORG_NS).await.unwrap_err();
        let migration = err.downcast_ref::<MigrationError>().expect("migration error");
        assert!(migration.is_recoverable());
    }

    #[tokio::test]
    async fn prepare_rejects_bad_org_namespace_before_listing() {
        let source = MemoryStore::with_apps(vec![app("loki", "giantswarm")]);
        let err = prepare_stream(&source, &FilterRules::default(), "wc1", "acme").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<MigrationError>(), Some(MigrationError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn apply_waits_then_applies_once() {
        let applier = CountingApplier::default();
        let payload = b"kind: App\n---\n";
        apply_stream(
            &ready_destination(),
            &applier,
            &fast_gate(),
            &RetryPolicy::default(),
            payload,
            ORG_NS,
            "wc1",
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(applier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_payload_skips_readiness_and_apply() {
        let applier = CountingApplier::default();
        let err = apply_stream(
            &MemoryStore::new(),
            &applier,
            &fast_gate(),
            &RetryPolicy::default(),
            b"",
            ORG_NS,
            "wc1",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MigrationError::EmptyMigration));
        assert_eq!(applier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unready_destination_times_out_without_applying() {
        let applier = CountingApplier::default();
        let err = apply_stream(
            &MemoryStore::new(),
            &applier,
            &fast_gate(),
            &RetryPolicy::default(),
            b"kind: App\n---\n",
            ORG_NS,
            "wc1",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MigrationError::ReadinessTimeout { .. }), "err={:?}", err);
        assert_eq!(applier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn preflight_reports_exclusions_and_prerequisites() {
        let source = MemoryStore::with_apps(vec![app("loki", "giantswarm"), app("coredns", "default")]);
        let dest = MemoryStore::new();
        dest.insert_object(
            ConfigKind::Secret,
            RawObject { name: "wc1-kubeconfig".into(), namespace: ORG_NS.into(), ..Default::default() },
        );
        let report = preflight(&source, Some((&dest, ORG_NS)), &fast_gate(), &FilterRules::default(), "wc1")
            .await
            .unwrap();
        assert_eq!(report.eligible, vec!["loki".to_string()]);
        assert_eq!(report.excluded.len(), 1);
        assert!(!report.is_ready());
        let text = report.to_string();
        assert!(text.contains("- coredns (catalog \"default\" is installed by default)"), "{}", text);
        assert!(text.contains("missing  ConfigMap wc1-cluster-values"), "{}", text);
        assert!(text.contains("present  Secret wc1-kubeconfig"), "{}", text);
    }

    #[tokio::test]
    async fn preflight_without_destination_skips_probe() {
        let source = MemoryStore::with_apps(vec![app("loki", "giantswarm")]);
        let report = preflight::<_, MemoryStore>(&source, None, &fast_gate(), &FilterRules::default(), "wc1")
            .await
            .unwrap();
        assert!(report.prerequisites.is_empty());
        assert!(report.is_ready());
    }
}
