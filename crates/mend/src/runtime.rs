//! Daemon assembly: per-repo poller tasks feeding a bounded worker pool,
//! approval and health-check polling, scheduled background jobs, the
//! dashboard server, and cooperative shutdown.

use chrono::{DateTime, Utc};
use mend_core::alerting::MetricAlerts;
use mend_core::backoff::{jittered_interval, Backoff};
use mend_core::circuit::CircuitBreaker;
use mend_core::clock::{Clock, SystemClock};
use mend_core::config::{Config, Secrets};
use mend_core::dryrun::DryRunRecorder;
use mend_core::error::{MendError, PollError};
use mend_core::memory::PatternMemory;
use mend_core::metrics::MetricsRegistry;
use mend_core::orchestrator::{Engine, EngineDeps};
use mend_core::personality::PersonalityProfiler;
use mend_core::poller::Poller;
use mend_core::report::{is_weekly_report_due, HealthReporter};
use mend_core::types::FailureId;
use mend_core::Store;
use mend_db::{schema, DbStore};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

const WORK_QUEUE_DEPTH: usize = 1_024;
const APPROVAL_POLL_SECS: u64 = 60;
const HEALTH_POLL_SECS: u64 = 30;
const SNAPSHOT_CLEANUP_SECS: u64 = 24 * 60 * 60;
const METRIC_EVAL_SECS: u64 = 15 * 60;
const REPORT_CHECK_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Normal,
    Interrupted,
}

#[derive(Debug, Clone)]
struct WorkItem {
    repository: String,
    failure_id: FailureId,
}

/// At most one in-flight orchestrator step per repository.
#[derive(Default, Clone)]
struct RepoLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RepoLocks {
    fn lock_for(&self, repository: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("repo locks poisoned");
        map.entry(repository.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn db_path() -> String {
    std::env::var("MEND_DB_PATH").unwrap_or_else(|_| ".mend/mend.db".to_string())
}

fn build_engine(path: &str, deps: &EngineDeps) -> Result<Engine<DbStore>, MendError> {
    let conn = schema::open_and_migrate(path).map_err(|err| MendError::Internal {
        message: err.to_string(),
    })?;
    Ok(Engine::new(DbStore::new(conn), deps.clone()))
}

pub async fn run(config: Config, secrets: Secrets) -> Result<Shutdown, MendError> {
    let path = db_path();
    if let Some(parent) = std::path::Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Substrate clients. Authentication is verified up front; an unreachable
    // substrate is a startup failure, not a retry loop.
    let vcs = Arc::new(mend_vcs::GithubClient::new(secrets.github_token.clone())?);
    vcs.verify_authentication().await?;
    let model = Arc::new(mend_llm::ChatClient::new(secrets.llm_api_key.clone())?);
    let notifier = Arc::new(mend_notify::WebhookNotifier::new(
        secrets.notifier_webhook.clone(),
    )?);
    let embedder: Option<Arc<dyn mend_core::llm::EmbeddingClient>> = secrets
        .embedding_api_key
        .clone()
        .map(|key| {
            mend_llm::RemoteEmbedder::new(key)
                .map(|client| Arc::new(client) as Arc<dyn mend_core::llm::EmbeddingClient>)
        })
        .transpose()?;

    let dry_run = config
        .dry_run
        .then(|| Arc::new(DryRunRecorder::new(clock.clone())));
    let deps = EngineDeps {
        config: config.clone(),
        clock: clock.clone(),
        vcs: vcs.clone(),
        model,
        notifier: notifier.clone(),
        breaker: Arc::new(CircuitBreaker::new(
            config.circuit_failure_threshold,
            config.circuit_auto_reset_hours,
            clock.clone(),
        )),
        memory: Arc::new(PatternMemory::new(
            embedder,
            clock.clone(),
            config.pattern_cap_per_repo,
            config.store_negative_patterns,
        )),
        profiler: Arc::new(PersonalityProfiler::new(clock.clone())),
        metrics: Arc::new(MetricsRegistry::default()),
        dry_run: dry_run.clone(),
    };

    // Recover persisted state before anything polls.
    build_engine(&path, &deps)?.recover().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (work_tx, work_rx) = mpsc::channel::<WorkItem>(WORK_QUEUE_DEPTH);
    let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
    let repo_locks = RepoLocks::default();
    let mut tasks = Vec::new();

    // One poller task per repository.
    for repository in config.repositories.clone() {
        let deps = deps.clone();
        let path = path.clone();
        let work_tx = work_tx.clone();
        let mut shutdown = shutdown_rx.clone();
        let interval = Duration::from_secs(config.polling_interval_minutes * 60);
        tasks.push(tokio::spawn(async move {
            let poller = Poller::new(deps.vcs.clone(), deps.clock.clone());
            let backoff = Backoff::default();
            let mut rate_limit_strikes = 0u32;
            loop {
                let sleep_for = jittered_interval(interval);
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = shutdown.changed() => break,
                }

                let engine = match build_engine(&path, &deps) {
                    Ok(engine) => engine,
                    Err(err) => {
                        error!(error = %err, "store unavailable, skipping poll tick");
                        continue;
                    }
                };
                match poller.poll_once(engine.store(), &repository).await {
                    Ok(failures) => {
                        rate_limit_strikes = 0;
                        for failure in failures {
                            let item = WorkItem {
                                repository: repository.clone(),
                                failure_id: failure.id,
                            };
                            if work_tx.send(item).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(MendError::Poll(PollError::RateLimited { reset_after_secs })) => {
                        // Honor the reset, then add jittered backoff on
                        // repeated strikes rather than tight-looping.
                        rate_limit_strikes += 1;
                        let delay = Duration::from_secs(reset_after_secs)
                            + backoff.delay(rate_limit_strikes.min(6));
                        warn!(repository = %repository, ?delay, "poll rate limited, rescheduling");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                    Err(err) => {
                        warn!(repository = %repository, error = %err, "poll tick failed");
                    }
                }
            }
        }));
    }
    drop(work_tx);

    // Bounded worker pool draining the queue.
    let worker_count = std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
        .max(8);
    info!(workers = worker_count, "starting remediation workers");
    for _ in 0..worker_count {
        let deps = deps.clone();
        let path = path.clone();
        let work_rx = work_rx.clone();
        let repo_locks = repo_locks.clone();
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let item = {
                    let mut rx = work_rx.lock().await;
                    tokio::select! {
                        item = rx.recv() => item,
                        _ = shutdown.changed() => None,
                    }
                };
                let Some(item) = item else { break };

                let lock = repo_locks.lock_for(&item.repository);
                let _held = lock.lock().await;
                let engine = match build_engine(&path, &deps) {
                    Ok(engine) => engine,
                    Err(err) => {
                        error!(error = %err, "store unavailable, dropping work item");
                        continue;
                    }
                };
                if let Err(err) = engine.process_failure(&item.failure_id).await {
                    error!(
                        failure_id = %item.failure_id,
                        error = %err,
                        "failure processing error"
                    );
                }
            }
        }));
    }

    // Approval polling, cancelable mid-wait.
    tasks.push(spawn_interval_job(
        "approval-poll",
        Duration::from_secs(APPROVAL_POLL_SECS),
        shutdown_rx.clone(),
        deps.clone(),
        path.clone(),
        |engine| async move { engine.poll_approvals().await.map(|_| ()) },
    ));

    // Health check execution.
    tasks.push(spawn_interval_job(
        "health-checks",
        Duration::from_secs(HEALTH_POLL_SECS),
        shutdown_rx.clone(),
        deps.clone(),
        path.clone(),
        |engine| async move { engine.run_due_health_checks().await.map(|_| ()) },
    ));

    // Daily snapshot cleanup.
    tasks.push(spawn_interval_job(
        "snapshot-cleanup",
        Duration::from_secs(SNAPSHOT_CLEANUP_SECS),
        shutdown_rx.clone(),
        deps.clone(),
        path.clone(),
        |engine| async move {
            engine
                .snapshots()
                .cleanup_expired(&engine.store().snapshots())
                .map(|_| ())
                .map_err(MendError::Snapshot)
        },
    ));

    // Metric threshold evaluation.
    {
        let alerts = Arc::new(MetricAlerts::new(
            deps.clock.clone(),
            deps.notifier.clone(),
            config.channels.critical.clone(),
        ));
        let deps = deps.clone();
        let path = path.clone();
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(METRIC_EVAL_SECS)) => {}
                    _ = shutdown.changed() => break,
                }
                match build_engine(&path, &deps) {
                    Ok(engine) => {
                        if let Err(err) = alerts.evaluate(engine.store()).await {
                            warn!(error = %err, "metric evaluation failed");
                        }
                    }
                    Err(err) => warn!(error = %err, "store unavailable for metric evaluation"),
                }
            }
        }));
    }

    // Weekly health report.
    {
        let reporter = HealthReporter::new(
            deps.clock.clone(),
            deps.notifier.clone(),
            config.channels.alerts.clone(),
        );
        let deps = deps.clone();
        let path = path.clone();
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let mut last_sent: Option<DateTime<Utc>> = None;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(REPORT_CHECK_SECS)) => {}
                    _ = shutdown.changed() => break,
                }
                let now = deps.clock.now();
                if !is_weekly_report_due(now, last_sent) {
                    continue;
                }
                match build_engine(&path, &deps) {
                    Ok(engine) => match reporter.send(engine.store()).await {
                        Ok(_) => last_sent = Some(now),
                        Err(err) => warn!(error = %err, "weekly report failed"),
                    },
                    Err(err) => warn!(error = %err, "store unavailable for weekly report"),
                }
            }
        }));
    }

    // Read-only dashboard + metrics endpoint.
    let port = std::env::var("MEND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(4815);
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let app_state = mend_serve::AppState {
        db_path: path.clone(),
        config: config.clone(),
        metrics: deps.metrics.clone(),
        profiler: deps.profiler.clone(),
    };
    {
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                result = mend_serve::serve(app_state, addr) => {
                    if let Err(err) = result {
                        error!(error = %err, "dashboard server exited");
                    }
                }
                _ = shutdown.changed() => {}
            }
        }));
    }
    info!(%addr, repositories = config.repositories.len(), "mend monitor running");

    // Wait for interrupt, then propagate shutdown through the watch channel.
    let interrupted = tokio::signal::ctrl_c().await.is_ok();
    info!("shutdown requested, finishing in-flight steps");
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    if let Some(recorder) = &dry_run {
        let report = recorder.report();
        info!(
            session = %report.session_id,
            actions = report.total_actions,
            "dry-run session summary"
        );
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
    }

    Ok(if interrupted {
        Shutdown::Interrupted
    } else {
        Shutdown::Normal
    })
}

fn spawn_interval_job<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    deps: EngineDeps,
    path: String,
    job: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(Engine<DbStore>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), MendError>> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => break,
            }
            match build_engine(&path, &deps) {
                Ok(engine) => {
                    if let Err(err) = job(engine).await {
                        warn!(job = name, error = %err, "scheduled job failed");
                    }
                }
                Err(err) => warn!(job = name, error = %err, "store unavailable for job"),
            }
        }
    })
}
