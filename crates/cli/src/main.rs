use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use appmig_apply::{KubectlApplier, ManifestApplier, ReadinessGate, RetryPolicy, ServerSideApplier};
use appmig_core::{validate_organization_namespace, MigrationError};
use appmig_filter::FilterRules;
use appmig_kubehub::KubeStore;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod dump;
mod pipeline;

#[derive(Parser, Debug)]
#[command(name = "app-migration-cli", version, about = "Migrate the Apps of a workload cluster to another management cluster")]
struct Cli {
    /// Prefix turning a management cluster name into a kubeconfig context
    #[arg(long = "context-prefix", global = true, env = "APPMIG_CONTEXT_PREFIX", default_value = "gs-")]
    context_prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct Target {
    /// Source management cluster
    #[arg(short = 's', long = "source")]
    source: String,
    /// Destination management cluster
    #[arg(short = 'd', long = "destination")]
    destination: String,
    /// Workload cluster whose Apps are migrated
    #[arg(short = 'n', long = "cluster")]
    cluster: String,
}

impl Target {
    fn validate(&self) -> Result<(), MigrationError> {
        for (flag, value) in [("--source", &self.source), ("--destination", &self.destination), ("--cluster", &self.cluster)] {
            if value.trim().is_empty() {
                return Err(MigrationError::Validation(format!("{} must not be empty", flag)));
            }
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Kubectl,
    ServerSide,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report eligible Apps and destination prerequisites without changing anything
    Preflight {
        #[command(flatten)]
        target: Target,
        /// Organization namespace on the destination; enables the prerequisite probe
        #[arg(short = 'o', long = "org-namespace")]
        org_namespace: Option<String>,
        /// YAML file replacing the built-in filter rules
        #[arg(long = "filter-rules")]
        filter_rules: Option<PathBuf>,
    },
    /// Transform the eligible Apps and write them to the migration file
    Prepare {
        #[command(flatten)]
        target: Target,
        /// Organization namespace on the destination
        #[arg(short = 'o', long = "org-namespace")]
        org_namespace: String,
        /// Migration file (default: <source>-<cluster>-apps.yaml)
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
        /// YAML file replacing the built-in filter rules
        #[arg(long = "filter-rules")]
        filter_rules: Option<PathBuf>,
    },
    /// Wait for the destination to be ready, then apply the migration file
    Apply {
        #[command(flatten)]
        target: Target,
        /// Organization namespace on the destination
        #[arg(short = 'o', long = "org-namespace")]
        org_namespace: String,
        /// Migration file (default: <source>-<cluster>-apps.yaml)
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
        #[arg(long = "backend", value_enum, env = "APPMIG_APPLY_BACKEND", default_value_t = Backend::Kubectl)]
        backend: Backend,
        /// Apply retries after the first attempt [env: APPMIG_RETRY_MAX]
        #[arg(long = "retry-max")]
        retry_max: Option<u32>,
        /// Seconds between apply attempts [env: APPMIG_RETRY_DELAY_SECS]
        #[arg(long = "retry-delay-secs")]
        retry_delay_secs: Option<u64>,
        /// Seconds between readiness polls [env: APPMIG_POLL_SECS]
        #[arg(long = "poll-secs")]
        poll_secs: Option<u64>,
        /// Readiness deadline, 0 waits until Ctrl-C [env: APPMIG_READY_TIMEOUT_SECS]
        #[arg(long = "ready-timeout-secs")]
        ready_timeout_secs: Option<u64>,
    },
}

fn init_tracing() {
    let env = std::env::var("APPMIG_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("APPMIG_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid APPMIG_METRICS_ADDR; expected host:port");
        }
    }
}

fn context_name(prefix: &str, management_cluster: &str) -> String {
    format!("{}{}", prefix, management_cluster)
}

fn load_rules(path: Option<&Path>) -> Result<FilterRules> {
    match path {
        Some(p) => FilterRules::from_yaml_file(p),
        None => Ok(FilterRules::default()),
    }
}

fn retry_policy(retry_max: Option<u32>, retry_delay_secs: Option<u64>) -> RetryPolicy {
    let mut policy = RetryPolicy::from_env();
    if let Some(n) = retry_max {
        policy.max_retries = n;
    }
    if let Some(s) = retry_delay_secs {
        policy.delay = Duration::from_secs(s);
    }
    policy
}

fn readiness_gate(poll_secs: Option<u64>, ready_timeout_secs: Option<u64>) -> ReadinessGate {
    let mut gate = ReadinessGate::from_env();
    if let Some(s) = poll_secs {
        gate.poll_interval = Duration::from_secs(s.max(1));
    }
    if let Some(s) = ready_timeout_secs {
        gate.timeout = (s > 0).then(|| Duration::from_secs(s));
    }
    gate
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; cancelling");
            trigger.cancel();
        }
    });
    token
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Preflight { target, org_namespace, filter_rules } => {
            target.validate()?;
            if let Some(ns) = &org_namespace {
                validate_organization_namespace(ns)?;
            }
            let rules = load_rules(filter_rules.as_deref())?;
            let source = KubeStore::connect(&context_name(&cli.context_prefix, &target.source)).await?;
            let dest = KubeStore::connect(&context_name(&cli.context_prefix, &target.destination)).await?;
            let report = pipeline::preflight(
                &source,
                org_namespace.as_deref().map(|ns| (&dest, ns)),
                &ReadinessGate::from_env(),
                &rules,
                &target.cluster,
            )
            .await?;
            print!("{}", report);
            if org_namespace.is_none() {
                warn!("no --org-namespace given; destination prerequisites not probed");
            }
            if !report.is_ready() {
                warn!(cluster = %target.cluster, "migration would not complete right now");
            }
        }
        Commands::Prepare { target, org_namespace, file, filter_rules } => {
            target.validate()?;
            validate_organization_namespace(&org_namespace)?;
            let rules = load_rules(filter_rules.as_deref())?;
            let path = dump::dump_path(file.as_deref(), &target.source, &target.cluster);
            let source = KubeStore::connect(&context_name(&cli.context_prefix, &target.source)).await?;
            match pipeline::prepare_stream(&source, &rules, &target.cluster, &org_namespace).await {
                Ok(stream) => {
                    dump::write(&path, &stream)?;
                    info!(path = %path.display(), bytes = stream.len(), "migration file written");
                    println!("{}", path.display());
                }
                Err(e) if matches!(e.downcast_ref::<MigrationError>(), Some(MigrationError::EmptyResult)) => {
                    dump::write(&path, b"")?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
        Commands::Apply {
            target,
            org_namespace,
            file,
            backend,
            retry_max,
            retry_delay_secs,
            poll_secs,
            ready_timeout_secs,
        } => {
            target.validate()?;
            validate_organization_namespace(&org_namespace)?;
            let path = dump::dump_path(file.as_deref(), &target.source, &target.cluster);
            let payload = dump::read(&path)?;
            if appmig_core::is_empty_payload(&payload) {
                return Err(MigrationError::EmptyMigration.into());
            }
            let dest_context = context_name(&cli.context_prefix, &target.destination);
            let dest = KubeStore::connect(&dest_context).await?;
            let applier: Box<dyn ManifestApplier> = match backend {
                Backend::Kubectl => Box::new(KubectlApplier::new(dest_context.clone())),
                Backend::ServerSide => Box::new(ServerSideApplier::new(dest.client())),
            };
            let cancel = cancel_on_ctrl_c();
            pipeline::apply_stream(
                &dest,
                applier.as_ref(),
                &readiness_gate(poll_secs, ready_timeout_secs),
                &retry_policy(retry_max, retry_delay_secs),
                &payload,
                &org_namespace,
                &target.cluster,
                &cancel,
            )
            .await
            .with_context(|| format!("applying {} to {}", path.display(), dest_context))?;
            println!("migrated {} to {}", target.cluster, target.destination);
        }
    }
    Ok(())
}

/// 0 for "nothing to migrate" outcomes, 2 for every other failure.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<MigrationError>() {
        Some(m) if m.is_recoverable() => 0,
        _ => 2,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let status = exit_status(&e);
            if status == 0 {
                warn!("{:#}", e);
            } else {
                eprintln!("Error: {:#}", e);
                eprintln!("(set APPMIG_LOG=debug for more detail)");
            }
            ExitCode::from(status)
        }
    }
}
