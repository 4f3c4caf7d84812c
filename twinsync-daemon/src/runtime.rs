use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use twinsync_core::{registry, ConfigError, PairName, RemotePair, SyncRun, Trigger};
use twinsync_sync::{run_store, CancelToken, RunResult};

use crate::error::{io_err, DaemonError};
use crate::paths::{logs_dir, pairs_root, run_dir, socket_path, DEBOUNCE_WINDOW, SCHEDULE_TICK};
use crate::protocol::{DaemonRequest, DaemonResponse, CMD_RUN, CMD_STATUS, CMD_STOP};

pub type PairCache = HashMap<PairName, RemotePair>;

/// Latest finished (or skipped) run per pair, as seen by this daemon.
type LastRuns = HashMap<PairName, RunSummary>;

/// Where the daemon writes its tracing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Foreground: everything to stdout.
    Stdout,
    /// `daemon.log`, with warnings and errors duplicated into `daemon-err.log`.
    Files,
}

struct RunJob {
    pair: PairName,
    trigger: Trigger,
    source: &'static str,
    respond_to: Option<oneshot::Sender<Result<RunSummary, String>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub pair: String,
    pub trigger: String,
    pub source: String,
    /// `completed` or `skipped`.
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u128,
}

impl RunSummary {
    fn completed(run: &SyncRun, source: &str, duration: Duration) -> Self {
        Self {
            pair: run.pair.0.clone(),
            trigger: run.trigger.kind.to_string(),
            source: source.to_string(),
            result: "completed",
            run_id: Some(run.id.0.clone()),
            outcome: Some(run.outcome.label().to_string()),
            verdict: Some(run.verdict().to_string()),
            reason: None,
            finished_at: run.finished_at,
            duration_ms: duration.as_millis(),
        }
    }

    fn skipped(job: &RunJob, reason: String, duration: Duration) -> Self {
        Self {
            pair: job.pair.0.clone(),
            trigger: job.trigger.kind.to_string(),
            source: job.source.to_string(),
            result: "skipped",
            run_id: None,
            outcome: None,
            verdict: None,
            reason: Some(reason),
            finished_at: Utc::now(),
            duration_ms: duration.as_millis(),
        }
    }
}

/// Shared state handed to every task.
#[derive(Clone)]
struct Shared {
    home: PathBuf,
    cache: Arc<RwLock<PairCache>>,
    last_runs: Arc<RwLock<LastRuns>>,
    active: Arc<RwLock<Option<PairName>>>,
    started_at: DateTime<Utc>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, target: LogTarget) -> Result<(), DaemonError> {
    ensure_runtime_dirs(home)?;
    init_tracing(home, target);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon until `stop`, SIGINT/SIGTERM or a task failure.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    // Registered before the socket exists so a signal never hits the default handler.
    let mut signals = ShutdownSignals::register()?;

    let cache = load_pair_cache(&home)?;
    let last_runs = seed_last_runs(&home, &cache);
    tracing::info!(
        pairs = cache.len(),
        socket = %socket_path(&home).display(),
        "twinsync daemon starting",
    );
    let shared = Shared {
        home: home.clone(),
        cache: Arc::new(RwLock::new(cache)),
        last_runs: Arc::new(RwLock::new(last_runs)),
        active: Arc::new(RwLock::new(None)),
        started_at: Utc::now(),
    };
    let cancel = CancelToken::new();
    let (run_tx, run_rx) = mpsc::channel::<RunJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let schedule_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let run_tx = run_tx.clone();
        tokio::spawn(async move {
            let result = schedule_task(shared, run_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = watcher_task(shared, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = run_processor_task(shared, cancel, run_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        let run_tx = run_tx.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(shared, run_tx, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };
    drop(run_tx);

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            let result = tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = signals.recv() => {
                    let _ = shutdown.send(());
                    match signal {
                        Some(name) => {
                            tracing::info!(signal = name, "shutting down daemon");
                            Ok(())
                        }
                        None => Err(DaemonError::TaskFailed {
                            task: "signal handler",
                            reason: "signal stream closed".to_string(),
                        }),
                    }
                }
            };
            // Wakes a run blocked in the deployment monitor.
            cancel.cancel();
            result
        })
    };

    let (
        schedule_result,
        watcher_result,
        processor_result,
        socket_result,
        rotation_result,
        signal_result,
    ) = tokio::join!(
        schedule_handle,
        watcher_handle,
        processor_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("schedule", schedule_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("run_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("twinsync daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Schedule loop
// ---------------------------------------------------------------------------

async fn schedule_task(
    shared: Shared,
    run_tx: mpsc::Sender<RunJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(SCHEDULE_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut enqueued = HashMap::<PairName, DateTime<Utc>>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let now = Utc::now();
                let due = {
                    let cache = shared.cache.read().await;
                    let last_runs = shared.last_runs.read().await;
                    due_pairs(&cache, &last_runs, &enqueued, shared.started_at, now)
                };
                for pair in due {
                    let job = RunJob {
                        trigger: Trigger::schedule(pair.source.branch.clone()),
                        pair: pair.name.clone(),
                        source: "schedule",
                        respond_to: None,
                    };
                    match run_tx.try_send(job) {
                        Ok(()) => {
                            tracing::info!(pair = %pair.name, "scheduled run enqueued");
                            enqueued.insert(pair.name, now);
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!(pair = %pair.name, "run queue full, scheduled trigger dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            return Err(DaemonError::ChannelClosed("run queue"));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Pairs whose schedule interval has elapsed since their last run, the last
/// scheduled enqueue, or (with neither) the daemon start.
fn due_pairs(
    cache: &PairCache,
    last_runs: &LastRuns,
    enqueued: &HashMap<PairName, DateTime<Utc>>,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<RemotePair> {
    let mut due: Vec<RemotePair> = cache
        .values()
        .filter(|pair| pair.schedule.enabled && pair.schedule.interval_secs > 0)
        .filter(|pair| {
            let base = [
                last_runs.get(&pair.name).map(|r| r.finished_at),
                enqueued.get(&pair.name).copied(),
            ]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(started_at);
            let interval = i64::try_from(pair.schedule.interval_secs).unwrap_or(i64::MAX);
            (now - base).num_seconds() >= interval
        })
        .cloned()
        .collect();
    due.sort_by(|a, b| a.name.cmp(&b.name));
    due
}

// ---------------------------------------------------------------------------
// Pair config watcher
// ---------------------------------------------------------------------------

async fn watcher_task(
    shared: Shared,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let pairs = pairs_root(&shared.home);
    if !pairs.exists() {
        fs::create_dir_all(&pairs).map_err(|e| io_err(&pairs, e))?;
    }
    // Event paths arrive canonicalized on some platforms.
    let pairs = fs::canonicalize(&pairs).unwrap_or(pairs);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&pairs, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %pairs.display(), "watching pair configs");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    let Some(name) = pair_name_for_path(&path, &pairs) else { continue };
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    let home = shared.home.clone();
                    let cache = shared.cache.clone();
                    let reloaded = tokio::task::spawn_blocking(move || {
                        let mut cache = cache.blocking_write();
                        reload_pair(&home, &mut cache, &name).map(|present| (name, present))
                    })
                    .await
                    .map_err(|err| DaemonError::TaskFailed {
                        task: "cache reload",
                        reason: err.to_string(),
                    })?;
                    match reloaded {
                        Ok((name, true)) => tracing::info!(pair = %name, "pair config reloaded"),
                        Ok((name, false)) => tracing::info!(pair = %name, "pair config removed"),
                        Err(err) => tracing::warn!(error = %err, "pair config reload failed, keeping previous"),
                    }
                }
            }
        }
    }
    Ok(())
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// `<pairs>/<name>.yaml` → `name`. Temp files from atomic saves are ignored.
fn pair_name_for_path(path: &Path, pairs: &Path) -> Option<PairName> {
    if path.parent() != Some(pairs) {
        return None;
    }
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml"))
        .unwrap_or(false);
    if !is_yaml {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(PairName::from)
}

/// Refresh one cache entry from disk. Returns whether the pair still exists.
/// A malformed file leaves the previous entry in place.
fn reload_pair(home: &Path, cache: &mut PairCache, name: &PairName) -> Result<bool, DaemonError> {
    match registry::load_pair_at(home, name) {
        Ok(pair) => {
            cache.insert(name.clone(), pair);
            Ok(true)
        }
        Err(ConfigError::PairNotFound { .. }) => {
            cache.remove(name);
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

fn load_pair_cache(home: &Path) -> Result<PairCache, DaemonError> {
    Ok(registry::list_pairs_at(home)?
        .into_iter()
        .map(|pair| (pair.name.clone(), pair))
        .collect())
}

/// Last runs persisted by earlier processes, so schedules survive restarts.
fn seed_last_runs(home: &Path, cache: &PairCache) -> LastRuns {
    let mut seeded = LastRuns::new();
    for name in cache.keys() {
        match run_store::load_last_at(home, name) {
            Ok(Some(run)) => {
                let took = (run.finished_at - run.started_at).to_std().unwrap_or_default();
                seeded.insert(name.clone(), RunSummary::completed(&run, "history", took));
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(pair = %name, error = %err, "ignoring unreadable last run"),
        }
    }
    seeded
}

// ---------------------------------------------------------------------------
// Serial run processor
// ---------------------------------------------------------------------------

async fn run_processor_task(
    shared: Shared,
    cancel: CancelToken,
    mut run_rx: mpsc::Receiver<RunJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = run_rx.recv() => {
                let Some(mut job) = maybe_job else { break };
                if cancel.is_cancelled() {
                    reply(&mut job, Err("daemon is shutting down".to_string()));
                    break;
                }
                *shared.active.write().await = Some(job.pair.clone());
                let started = Instant::now();

                let home = shared.home.clone();
                let name = job.pair.clone();
                let trigger = job.trigger.clone();
                let token = cancel.clone();
                let result = tokio::task::spawn_blocking(move || {
                    twinsync_sync::run_pair_at(&home, &name, trigger, &token)
                })
                .await
                .map_err(|err| DaemonError::TaskFailed {
                    task: "run",
                    reason: err.to_string(),
                })?;
                *shared.active.write().await = None;

                let outcome = match result {
                    Ok(RunResult::Completed { run, .. }) => {
                        let summary = RunSummary::completed(&run, job.source, started.elapsed());
                        tracing::info!(
                            pair = %summary.pair,
                            trigger = %summary.trigger,
                            outcome = summary.outcome.as_deref().unwrap_or_default(),
                            verdict = summary.verdict.as_deref().unwrap_or_default(),
                            duration_ms = summary.duration_ms,
                            "run finished",
                        );
                        Ok(summary)
                    }
                    Ok(RunResult::Skipped { reason }) => {
                        tracing::info!(pair = %job.pair, reason = %reason, "run skipped");
                        Ok(RunSummary::skipped(&job, reason, started.elapsed()))
                    }
                    Err(err) => {
                        tracing::error!(pair = %job.pair, error = %err, "run could not start");
                        Err(err.to_string())
                    }
                };
                if let Ok(summary) = &outcome {
                    shared
                        .last_runs
                        .write()
                        .await
                        .insert(job.pair.clone(), summary.clone());
                }
                reply(&mut job, outcome);
            }
        }
    }
    Ok(())
}

fn reply(job: &mut RunJob, outcome: Result<RunSummary, String>) {
    if let Some(tx) = job.respond_to.take() {
        let _ = tx.send(outcome);
    }
}

async fn enqueue_run(
    run_tx: &mpsc::Sender<RunJob>,
    pair: &RemotePair,
    source: &'static str,
) -> Result<RunSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    run_tx
        .send(RunJob {
            pair: pair.name.clone(),
            trigger: Trigger::manual(pair.source.branch.clone()),
            source,
            respond_to: Some(tx),
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("run queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("run response"))?;
    outcome.map_err(DaemonError::Protocol)
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    shared: Shared,
    run_tx: mpsc::Sender<RunJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                let run_tx = run_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared, run_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    shared: Shared,
    run_tx: mpsc::Sender<RunJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            CMD_STATUS => DaemonResponse::ok(build_status_payload(&shared).await),
            CMD_RUN => handle_run_request(&shared, &run_tx, request.pair.as_deref()).await,
            CMD_STOP => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == CMD_STOP {
            break;
        }
    }
    Ok(())
}

async fn handle_run_request(
    shared: &Shared,
    run_tx: &mpsc::Sender<RunJob>,
    pair: Option<&str>,
) -> DaemonResponse {
    let Some(name) = pair else {
        return DaemonResponse::error("run requires a pair name");
    };
    let pair = shared.cache.read().await.get(&PairName::from(name)).cloned();
    let Some(pair) = pair else {
        return DaemonResponse::error(DaemonError::UnknownPair(name.to_string()).to_string());
    };
    match enqueue_run(run_tx, &pair, "socket").await {
        Ok(summary) => DaemonResponse::ok(json!(summary)),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn build_status_payload(shared: &Shared) -> Value {
    let cache = shared.cache.read().await.clone();
    let last_runs = shared.last_runs.read().await.clone();
    let active = shared.active.read().await.clone();

    let mut names: Vec<&PairName> = cache.keys().collect();
    names.sort();
    let pairs: Vec<Value> = names
        .into_iter()
        .filter_map(|name| cache.get(name))
        .map(|pair| {
            json!({
                "name": pair.name.0,
                "schedule_enabled": pair.schedule.enabled,
                "interval_secs": pair.schedule.interval_secs,
                "last_run": last_runs.get(&pair.name),
            })
        })
        .collect();

    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at": shared.started_at.to_rfc3339(),
        "active": active.map(|name| name.0),
        "pairs": pairs,
        "socket": socket_path(&shared.home).display().to_string(),
        "pairs_root": pairs_root(&shared.home).display().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                // Failures are logged inside; rotation never stops the daemon.
                let _ = tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_daemon_logs(&home);
                })
                .await;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [pairs_root(home), run_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

/// SIGTERM (service managers) and SIGINT (ctrl-c in the foreground).
struct ShutdownSignals {
    terminate: Signal,
    interrupt: Signal,
}

impl ShutdownSignals {
    fn register() -> Result<Self, DaemonError> {
        Ok(ShutdownSignals {
            terminate: signal(SignalKind::terminate()).map_err(|e| io_err("sigterm-handler", e))?,
            interrupt: signal(SignalKind::interrupt()).map_err(|e| io_err("sigint-handler", e))?,
        })
    }

    /// Name of the next signal, or `None` once both streams are closed.
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            Some(()) = self.terminate.recv() => Some("SIGTERM"),
            Some(()) = self.interrupt.recv() => Some("SIGINT"),
            else => None,
        }
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    result.map_err(|err| DaemonError::TaskFailed {
        task,
        reason: err.to_string(),
    })?
}

fn init_tracing(home: &Path, target: LogTarget) {
    use tracing::Level;
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match target {
        LogTarget::Stdout => fmt().with_env_filter(filter).with_target(false).try_init(),
        LogTarget::Files => {
            let out = crate::paths::stdout_log_path(home);
            let err = crate::paths::stderr_log_path(home);
            let writer = (move || append_or_sink(&out))
                .and((move || append_or_sink(&err)).with_max_level(Level::WARN));
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
        }
    };
}

/// Reopened per event so rotation can move the file underneath us.
fn append_or_sink(path: &Path) -> Box<dyn Write> {
    match fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Box::new(file),
        Err(_) => Box::new(std::io::sink()),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
