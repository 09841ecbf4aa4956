mod cli;
mod config;

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use audit_log::{AuditEntry, AuditRecorder, JsonLinesSink, JsonLinesViolationSink};
use decision_service::DecisionService;
use policy_engine::{loader, Decision, DecisionRequest, PolicyConfig, RuleStore};

use crate::cli::{CheckArgs, Cli, Command};
use crate::config::{Config, LogFormat};

/// One line of `batch` output.
#[derive(Serialize)]
struct BatchOutcome<'a> {
    request_id: uuid::Uuid,
    decision: &'a Decision,
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;

    if let Some(ref policy) = cli.policy {
        cfg.policy_file = Some(policy.clone());
    }
    if let Some(ref level) = cli.log_level {
        cfg.logging.level = level.clone();
    }

    // 3. Init tracing-subscriber. Logs go to stderr; stdout carries results.
    init_tracing(&cfg);

    info!(
        config_file = %cli.config.display(),
        policy_file = ?cfg.policy_file,
        "rulegate starting"
    );

    match cli.command {
        Command::Validate { ref policy } => validate(policy),
        Command::Stats {
            ref audit_file,
            window_secs,
        } => stats_from_file(&cfg, audit_file, Duration::from_secs(window_secs)),
        Command::Rules { summary } => {
            let store = load_store(&cfg)?;
            if cli.emergency {
                store.set_emergency_mode(true);
            }
            if summary {
                print_json(&store.summary())
            } else {
                let listing = PolicyConfig {
                    version: "1.0".to_string(),
                    rules: store.list(),
                };
                print!("{}", serde_yml::to_string(&listing)?);
                Ok(())
            }
        }
        Command::Check(args) => {
            let runtime = Runtime::start(&cfg, cli.emergency).await?;
            let decision = runtime.service.decide(build_request(args)).await;
            print_json(&decision)?;
            runtime.shutdown().await;
            Ok(())
        }
        Command::Batch { ref input, stats } => {
            let runtime = Runtime::start(&cfg, cli.emergency).await?;
            let result = run_batch(&runtime.service, input, stats).await;
            runtime.shutdown().await;
            result
        }
    }
}

fn init_tracing(cfg: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    match cfg.logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn load_store(cfg: &Config) -> Result<RuleStore> {
    let policy = match &cfg.policy_file {
        Some(path) => loader::load_policy(path).context("failed to load policy file")?,
        None => {
            info!("no policy file configured; using the built-in policy");
            loader::builtin_policy()?
        }
    };
    let store = loader::build_store(policy)?;
    info!(summary = ?store.summary(), "policy loaded");
    Ok(store)
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// The decision service plus the background writers feeding its files.
struct Runtime {
    service: DecisionService,
    writers: Vec<tokio::task::JoinHandle<()>>,
}

impl Runtime {
    async fn start(cfg: &Config, emergency: bool) -> Result<Self> {
        let store = Arc::new(load_store(cfg)?);
        if emergency {
            store.set_emergency_mode(true);
        }

        let recorder = Arc::new(
            AuditRecorder::new(cfg.audit.max_entries).with_top_denied(cfg.audit.top_denied),
        );

        let mut service = DecisionService::new(store, Arc::new(cfg.subjects.clone()))
            .with_recorder(recorder)
            .with_settings(cfg.service);
        let mut writers = Vec::new();

        if let Some(path) = &cfg.audit.mirror_path {
            let (mirror, handle) = JsonLinesSink::<AuditEntry>::start(path)
                .await
                .context("failed to start audit mirror")?;
            info!(path = %path.display(), "mirroring audit entries");
            service = service.with_audit_mirror(mirror);
            writers.push(handle);
        }

        if let Some(path) = &cfg.violations.log_path {
            let (sink, handle) = JsonLinesViolationSink::start(path)
                .await
                .context("failed to start violation log")?;
            info!(path = %path.display(), "recording violations");
            service = service.with_violation_sink(Arc::new(sink));
            writers.push(handle);
        }

        info!(?service, "decision service ready");
        Ok(Self { service, writers })
    }

    /// Drop the service so every sink closes, then wait for the writers to
    /// flush.
    async fn shutdown(self) {
        drop(self.service);
        for handle in self.writers {
            if let Err(err) = handle.await {
                warn!(%err, "background writer did not shut down cleanly");
            }
        }
        info!("rulegate shutting down");
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn build_request(args: CheckArgs) -> DecisionRequest {
    let mut request = DecisionRequest::new(args.subject, args.action, args.resource);
    if let Some(id) = args.id {
        request.id = id;
    }
    if let Some(origin) = args.origin {
        request = request.with_origin(origin);
    }
    if let Some(at) = args.at {
        request = request.with_timestamp(at);
    }
    if let Some(session) = args.session {
        request = request.with_session(session);
    }
    for (key, value) in args.attributes {
        request = request.with_attribute(key, value);
    }
    request
}

async fn run_batch(service: &DecisionService, input: &Path, print_stats: bool) -> Result<()> {
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(input)
            .with_context(|| format!("failed to open {}", input.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut decided = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read request line")?;
        if line.trim().is_empty() {
            continue;
        }
        let request: DecisionRequest = serde_json::from_str(&line)
            .with_context(|| format!("invalid request on line {}", index + 1))?;
        let request_id = request.id;
        let decision = service.decide(request).await;
        let outcome = BatchOutcome {
            request_id,
            decision: &decision,
        };
        println!("{}", serde_json::to_string(&outcome)?);
        decided += 1;
    }

    info!(decided, "batch complete");

    if print_stats {
        print_json(&service.stats(Duration::MAX))?;
    }
    Ok(())
}

fn validate(policy: &Path) -> Result<()> {
    let config = loader::load_policy(policy)?;
    let store = loader::build_store(config)?;
    println!("{}: ok ({} rules)", policy.display(), store.len());
    print_json(&store.summary())
}

fn stats_from_file(cfg: &Config, audit_file: &Path, window: Duration) -> Result<()> {
    let file = std::fs::File::open(audit_file)
        .with_context(|| format!("failed to open audit file {}", audit_file.display()))?;
    let recorder = AuditRecorder::new(cfg.audit.max_entries).with_top_denied(cfg.audit.top_denied);

    let mut skipped = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line.context("failed to read audit file")?;
        match serde_json::from_str::<AuditEntry>(&line) {
            Ok(entry) => recorder.record(entry),
            Err(err) => {
                skipped += 1;
                warn!(%err, "skipping malformed audit line");
            }
        }
    }
    info!(loaded = recorder.len(), skipped, "audit file replayed");

    print_json(&recorder.stats(window))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
