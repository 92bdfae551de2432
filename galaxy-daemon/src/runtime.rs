use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::Instant;

use galaxy_core::{registry, settings::LogSettings, RepositoryName, Settings};
use galaxy_sync::{
    dispatch, CancelFlag, CurationEnv, FileRepositoryStore, MemoryTaskGroups, RepositoryStore,
    SyncError, TaskGroups, TaskKind, TaskOutput, TaskRequest, TaskScheduler,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{repositories_root, run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::reservations::{Reservations, Ticket};
use crate::scheduler::{QueueScheduler, QueuedTask};
use crate::table::{TaskState, TaskTable};

/// Shared worker state. Cloning is cheap; every clone sees the same tables.
#[derive(Clone)]
pub struct Worker {
    home: PathBuf,
    settings: Arc<Settings>,
    store: Arc<FileRepositoryStore>,
    table: Arc<TaskTable>,
    groups: Arc<MemoryTaskGroups>,
    scheduler: QueueScheduler,
    reservations: Arc<Reservations>,
    started_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(home: PathBuf, settings: Settings) -> (Self, mpsc::UnboundedReceiver<QueuedTask>) {
        let retain = settings.worker.retain_finished;
        let table = Arc::new(TaskTable::with_retention(retain));
        let (scheduler, queue) = QueueScheduler::new(table.clone());
        let worker = Self {
            store: Arc::new(FileRepositoryStore::at(&home)),
            home,
            settings: Arc::new(settings),
            table,
            groups: Arc::new(MemoryTaskGroups::with_retention(retain)),
            scheduler,
            reservations: Arc::new(Reservations::new()),
            started_at: Utc::now(),
        };
        (worker, queue)
    }

    pub fn table(&self) -> &TaskTable {
        &self.table
    }

    pub fn scheduler(&self) -> &QueueScheduler {
        &self.scheduler
    }

    /// Run one queued task: wait for its reservations, take a concurrency
    /// slot, then dispatch on a blocking thread.
    async fn execute(self, queued: QueuedTask, ticket: Ticket, slots: Arc<Semaphore>) {
        let QueuedTask {
            id,
            request,
            cancel,
        } = queued;
        let name = request.kind.name();

        // Canceled tasks still take their turn so later tasks keep queue order.
        let _reserved = ticket.wait().await;
        let Ok(_slot) = slots.acquire_owned().await else {
            self.table.fail(id, "worker shutting down".to_string());
            return;
        };
        if !self.table.start(id) {
            tracing::info!(task = %id, name, "task canceled before start");
            return;
        }

        let started = Instant::now();
        let worker = self.clone();
        let kind = request.kind;
        let joined =
            tokio::task::spawn_blocking(move || worker.execute_blocking(&kind, &cancel)).await;
        let state = match joined {
            Ok(result) => self.table.finish(id, result),
            Err(err) => self.table.fail(id, format!("task join failure: {err}")),
        };
        tracing::info!(
            task = %id,
            name,
            state = state.as_str(),
            duration_ms = started.elapsed().as_millis() as u64,
            "task finished"
        );
    }

    fn execute_blocking(&self, kind: &TaskKind, cancel: &CancelFlag) -> Result<TaskOutput, SyncError> {
        let env = CurationEnv {
            home: &self.home,
            store: self.store.as_ref(),
            scheduler: &self.scheduler,
            groups: self.groups.as_ref(),
            settings: &self.settings,
        };
        dispatch(&env, kind, cancel)
    }

    /// Enqueue a fan-out for `upstream` if any synclist mirrors it.
    async fn upstream_changed(&self, upstream: RepositoryName) {
        let home = self.home.clone();
        let name = upstream.clone();
        let synclists =
            tokio::task::spawn_blocking(move || registry::synclists_for_upstream_at(&home, &name))
                .await;
        match synclists {
            Ok(Ok(synclists)) if synclists.is_empty() => {
                tracing::debug!(repository = %upstream, "repository changed; no synclist mirrors it");
            }
            Ok(Ok(synclists)) => match self.scheduler.enqueue(TaskRequest::curate_all(upstream.clone())) {
                Ok(handle) => tracing::info!(
                    upstream = %upstream,
                    synclists = synclists.len(),
                    task = %handle.id,
                    "upstream changed; curation enqueued"
                ),
                Err(err) => tracing::error!(upstream = %upstream, error = %err, "failed to enqueue curation"),
            },
            Ok(Err(err)) => tracing::warn!(upstream = %upstream, error = %err, "synclist lookup failed"),
            Err(err) => tracing::warn!(upstream = %upstream, error = %err, "synclist lookup join error"),
        }
    }
}

/// Load settings, start the worker runtime and block the current thread until
/// it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let settings = Settings::load_at(home)?;
    init_tracing(&settings.log);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), settings))
}

/// Run the worker runtime until `stop` or ctrl-c.
pub async fn run(home: PathBuf, settings: Settings) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let (worker, queue) = Worker::new(home, settings);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let dispatcher_handle = {
        let shutdown = shutdown_tx.clone();
        let worker = worker.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = dispatcher_task(worker, queue, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let worker = worker.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = watcher_task(worker, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let worker = worker.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(worker, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down worker");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    tracing::info!(
        home = %worker.home.display(),
        concurrency = worker.settings.worker.concurrency,
        "worker started"
    );

    let (dispatcher_result, watcher_result, socket_result, signal_result) =
        tokio::join!(dispatcher_handle, watcher_handle, socket_handle, signal_handle);

    handle_join("dispatcher", dispatcher_result)?;
    handle_join("watcher", watcher_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn dispatcher_task(
    worker: Worker,
    mut queue: mpsc::UnboundedReceiver<QueuedTask>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let slots = Arc::new(Semaphore::new(worker.settings.worker.concurrency.max(1)));
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            queued = queue.recv() => {
                let Some(queued) = queued else { break };
                // Reserve here, in queue order, so tasks sharing a key run in
                // the order they were enqueued.
                let ticket = worker.reservations.reserve(&queued.request.locks);
                tokio::spawn(worker.clone().execute(queued, ticket, slots.clone()));
            }
        }
    }
    slots.close();
    Ok(())
}

// ---------------------------------------------------------------------------
// Upstream-change watcher
// ---------------------------------------------------------------------------

/// Trailing-edge debounce: a repository fires once no event for it arrived
/// within the window.
struct Debouncer {
    window: Duration,
    deadlines: HashMap<RepositoryName, Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            deadlines: HashMap::new(),
        }
    }

    fn touch(&mut self, repository: RepositoryName, now: Instant) {
        self.deadlines.insert(repository, now + self.window);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    fn due(&mut self, now: Instant) -> Vec<RepositoryName> {
        let mut due: Vec<RepositoryName> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &due {
            self.deadlines.remove(name);
        }
        due.sort();
        due
    }
}

async fn watcher_task(worker: Worker, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
    let repositories = repositories_root(&worker.home);
    fs::create_dir_all(&repositories).map_err(|e| io_err(&repositories, e))?;
    // notify reports canonical paths; compare against the same form.
    let repositories = fs::canonicalize(&repositories).unwrap_or(repositories);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&repositories, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %repositories.display(), "watching repositories");

    let mut debouncer = Debouncer::new(Duration::from_millis(worker.settings.worker.debounce_ms));

    loop {
        let deadline = debouncer.next_deadline();
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
                for path in &event.paths {
                    if let Some(repository) = repository_for_path(path, &repositories) {
                        debouncer.touch(repository, Instant::now());
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                for upstream in debouncer.due(Instant::now()) {
                    worker.upstream_changed(upstream).await;
                }
            }
        }
    }

    Ok(())
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// `<repositories>/<name>.json` → `name`. Temp files and anything outside
/// the directory are ignored.
fn repository_for_path(path: &Path, repositories: &Path) -> Option<RepositoryName> {
    if path.parent() != Some(repositories) {
        return None;
    }
    if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(RepositoryName::from)
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    worker: Worker,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&worker.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::debug!(socket = %socket.display(), "worker socket bound");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let worker = worker.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, worker, shutdown_tx).await {
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
    worker: Worker,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("worker socket read", e))?
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

        let stop = request.cmd == "stop";
        let response = handle_request(&worker, request, &shutdown_tx);
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

/// Answer one request. Curation commands return the task id immediately;
/// progress is observed through `task` and `group`.
pub fn handle_request(
    worker: &Worker,
    request: DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
) -> DaemonResponse {
    match try_handle_request(worker, request, shutdown_tx) {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

fn try_handle_request(
    worker: &Worker,
    request: DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<Value, DaemonError> {
    match request.cmd.as_str() {
        "status" => Ok(build_status_payload(worker)),
        "sync" => {
            let synclist = request
                .synclist
                .ok_or_else(|| DaemonError::Protocol("'sync' requires 'synclist'".to_string()))?;
            registry::validate_name(&synclist.0)?;
            if !registry::synclist_exists_at(&worker.home, &synclist) {
                return Err(DaemonError::Protocol(format!("synclist '{synclist}' not found")));
            }
            let handle = worker
                .scheduler
                .enqueue(TaskRequest::curate_synclist(synclist, None))?;
            Ok(json!({ "task": handle.id }))
        }
        "curate-all" => {
            let upstream = request
                .repository
                .unwrap_or_else(|| worker.settings.default_upstream());
            registry::validate_name(&upstream.0)?;
            if !worker.store.repository_exists(&upstream)? {
                return Err(SyncError::RepositoryNotFound(upstream).into());
            }
            let handle = worker.scheduler.enqueue(TaskRequest::curate_all(upstream))?;
            Ok(json!({ "task": handle.id }))
        }
        "task" => {
            let id = request
                .task
                .ok_or_else(|| DaemonError::Protocol("'task' requires 'task'".to_string()))?;
            let record = worker.table.get(id).ok_or(DaemonError::TaskNotFound(id))?;
            Ok(serde_json::to_value(record)?)
        }
        "group" => {
            let id = request
                .group
                .ok_or_else(|| DaemonError::Protocol("'group' requires 'group'".to_string()))?;
            let snapshot = worker.groups.snapshot(id)?;
            Ok(json!({
                "group": snapshot.group,
                "progress": snapshot.progress,
                "tasks": worker.table.in_group(id),
            }))
        }
        "cancel" => {
            let id = request
                .task
                .ok_or_else(|| DaemonError::Protocol("'cancel' requires 'task'".to_string()))?;
            let state = worker.table.cancel(id)?;
            Ok(json!({ "task": id, "state": state }))
        }
        "stop" => {
            let _ = shutdown_tx.send(());
            Ok(json!({ "stopping": true }))
        }
        other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    }
}

fn build_status_payload(worker: &Worker) -> Value {
    let counts = worker.table.counts();
    let tasks: serde_json::Map<String, Value> = TaskState::ALL
        .iter()
        .map(|state| {
            (
                state.as_str().to_string(),
                json!(counts.get(state).copied().unwrap_or(0)),
            )
        })
        .collect();
    let reserved: Vec<String> = worker
        .reservations
        .held()
        .iter()
        .map(ToString::to_string)
        .collect();

    json!({
        "running": true,
        "started_at": worker.started_at,
        "concurrency": worker.settings.worker.concurrency,
        "tasks": tasks,
        "reserved": reserved,
        "socket": socket_path(&worker.home).display().to_string(),
        "repositories_root": repositories_root(&worker.home).display().to_string(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "worker socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale worker socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [run_dir(home), repositories_root(home)] {
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
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("worker socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("worker socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("worker socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `log.level`.
pub fn init_tracing(log: &LogSettings) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    if log.json {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
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
