//! Owner of all live instances and the single source of truth for their
//! status.
//!
//! Every public operation serializes on a per-key lock, so operations on
//! one `(server, workspace)` pair never interleave. Spawning reserves a
//! port, composes the child environment, pipes stdio into ring buffers,
//! probes for readiness, and hands the instance to an exit watcher and a
//! health watcher. Unexpected deaths feed a bounded auto-retry.

use std::{
    collections::HashMap,
    path::PathBuf,
    process::Stdio,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Instant,
};

use {
    futures::future::join_all,
    tokio::{
        process::{Child, Command},
        sync::{Mutex, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use {
    mcphost_common::{Error, Result, now_ms},
    mcphost_config::SupervisorTimings,
    mcphost_events::{EventBus, ServerEventKind},
    mcphost_store::{
        PermissionStore, ProfileStore, SecretStore, ServerRecord, ServerStore, Workspace,
        WorkspaceStore,
    },
};

use crate::{
    command, env,
    instance::{InstanceKey, InstanceMetadata, InstanceSnapshot, InstanceStatus},
    logs::{self, LogRing},
    ports::PortAllocator,
    probe,
};

/// Runtime state of one spawned instance.
struct InstanceHandle {
    key: InstanceKey,
    port: u16,
    started_at: u64,
    status: RwLock<InstanceStatus>,
    pid: RwLock<Option<u32>>,
    last_ready_at: RwLock<Option<u64>>,
    metadata: RwLock<Option<InstanceMetadata>>,
    stdout: Arc<LogRing>,
    stderr: Arc<LogRing>,
    child: Mutex<Option<Child>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    /// Set when the supervisor initiated teardown; distinguishes stop from
    /// crash in the exit watcher.
    stopping: AtomicBool,
    /// Guards the port reservation so it is returned exactly once.
    port_released: AtomicBool,
    health_strikes: AtomicU32,
    retry_count: AtomicU32,
}

impl InstanceHandle {
    fn new(key: InstanceKey, port: u16) -> Arc<Self> {
        Arc::new(Self {
            key,
            port,
            started_at: now_ms(),
            status: RwLock::new(InstanceStatus::Starting),
            pid: RwLock::new(None),
            last_ready_at: RwLock::new(None),
            metadata: RwLock::new(None),
            stdout: Arc::new(LogRing::default()),
            stderr: Arc::new(LogRing::default()),
            child: Mutex::new(None),
            watchers: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
            port_released: AtomicBool::new(false),
            health_strikes: AtomicU32::new(0),
            retry_count: AtomicU32::new(0),
        })
    }

    async fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            server_id: self.key.server_id.clone(),
            workspace_id: self.key.workspace_id.clone(),
            pid: *self.pid.read().await,
            port: self.port,
            status: *self.status.read().await,
            started_at: self.started_at,
            last_ready_at: *self.last_ready_at.read().await,
            retry_count: self.retry_count.load(Ordering::Relaxed),
            metadata: self.metadata.read().await.clone(),
        }
    }

    async fn abort_watchers(&self) {
        for watcher in self.watchers.lock().await.drain(..) {
            watcher.abort();
        }
    }
}

/// Spawns, watches, restarts, and tears down server instances.
pub struct ProcessSupervisor {
    /// Back-reference for the watcher and retry tasks this supervisor
    /// spawns about itself.
    weak: Weak<ProcessSupervisor>,
    timings: SupervisorTimings,
    data_dir: PathBuf,
    ports: Arc<PortAllocator>,
    servers: Arc<ServerStore>,
    workspaces: Arc<WorkspaceStore>,
    secrets: Arc<SecretStore>,
    permissions: Arc<PermissionStore>,
    profile: Arc<ProfileStore>,
    events: EventBus,
    http: reqwest::Client,
    instances: RwLock<HashMap<InstanceKey, Arc<InstanceHandle>>>,
    key_locks: Mutex<HashMap<InstanceKey, Arc<Mutex<()>>>>,
    /// Auto-retry attempts per key within the rolling window.
    retry_history: Mutex<HashMap<InstanceKey, Vec<Instant>>>,
}

impl ProcessSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timings: SupervisorTimings,
        data_dir: PathBuf,
        ports: Arc<PortAllocator>,
        servers: Arc<ServerStore>,
        workspaces: Arc<WorkspaceStore>,
        secrets: Arc<SecretStore>,
        permissions: Arc<PermissionStore>,
        profile: Arc<ProfileStore>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            timings,
            data_dir,
            ports,
            servers,
            workspaces,
            secrets,
            permissions,
            profile,
            events,
            http: reqwest::Client::new(),
            instances: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            retry_history: Mutex::new(HashMap::new()),
        })
    }

    // ── Public operations ───────────────────────────────────────────────

    /// Start an instance. Idempotent: a `starting` or `running` instance is
    /// returned as-is; a `stopped` or `error` one is recreated.
    pub async fn start(&self, key: &InstanceKey) -> Result<InstanceSnapshot> {
        self.start_inner(key, true).await
    }

    /// Stop an instance. Idempotent; graceful, then forceful.
    pub async fn stop(&self, key: &InstanceKey) -> Result<()> {
        let _guard = self.lock_key(key).await?;
        self.locked_stop(key).await
    }

    /// Stop then start, atomically with respect to other operations on the
    /// same key.
    pub async fn restart(&self, key: &InstanceKey) -> Result<InstanceSnapshot> {
        let _guard = self.lock_key(key).await?;
        self.retry_history.lock().await.remove(key);
        self.locked_stop(key).await?;
        self.locked_start(key).await
    }

    /// Stop every instance in parallel. Returns once all children exited or
    /// the global deadline elapsed, at which point stragglers are killed.
    pub async fn stop_all(&self) {
        let keys: Vec<InstanceKey> = self.instances.read().await.keys().cloned().collect();
        if keys.is_empty() {
            return;
        }
        info!(count = keys.len(), "stopping all instances");

        let stops = keys.iter().map(|key| async move {
            if let Err(e) = self.stop(key).await {
                warn!(instance = %key, error = %e, "stop failed during shutdown");
            }
        });
        if tokio::time::timeout(self.timings.stop_all_deadline, join_all(stops))
            .await
            .is_err()
        {
            warn!("stop-all deadline elapsed, force-killing remaining children");
            let leftovers: Vec<Arc<InstanceHandle>> =
                self.instances.write().await.drain().map(|(_, h)| h).collect();
            for handle in leftovers {
                handle.stopping.store(true, Ordering::SeqCst);
                handle.abort_watchers().await;
                if let Some(mut child) = handle.child.lock().await.take() {
                    let _ = child.kill().await;
                }
                self.release_port(&handle).await;
            }
        }
    }

    /// Snapshot of every live instance.
    pub async fn list(&self) -> Vec<InstanceSnapshot> {
        let handles: Vec<Arc<InstanceHandle>> =
            self.instances.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.snapshot().await);
        }
        snapshots
    }

    pub async fn get(&self, key: &InstanceKey) -> Option<InstanceSnapshot> {
        let handle = self.instances.read().await.get(key).cloned()?;
        Some(handle.snapshot().await)
    }

    pub async fn status(&self, key: &InstanceKey) -> Option<InstanceStatus> {
        let handle = self.instances.read().await.get(key).cloned()?;
        let status = *handle.status.read().await;
        Some(status)
    }

    pub async fn metadata(&self, key: &InstanceKey) -> Option<InstanceMetadata> {
        let handle = self.instances.read().await.get(key).cloned()?;
        let metadata = handle.metadata.read().await;
        metadata.clone()
    }

    /// Stdio ring snapshots `(stdout, stderr)` for diagnostics.
    pub async fn stdio_logs(&self, key: &InstanceKey) -> Option<(Vec<String>, Vec<String>)> {
        let handle = self.instances.read().await.get(key).cloned()?;
        Some((handle.stdout.snapshot().await, handle.stderr.snapshot().await))
    }

    /// Stop every instance of one server (server delete).
    pub async fn stop_server(&self, server_id: &str) -> Result<()> {
        let keys: Vec<InstanceKey> = self
            .instances
            .read()
            .await
            .keys()
            .filter(|k| k.server_id == server_id)
            .cloned()
            .collect();
        for key in keys {
            self.stop(&key).await?;
        }
        Ok(())
    }

    /// Stop every instance of one workspace (workspace delete / cleanup).
    pub async fn stop_workspace(&self, workspace_id: &str) -> Result<()> {
        let keys: Vec<InstanceKey> = self
            .instances
            .read()
            .await
            .keys()
            .filter(|k| k.workspace_id == workspace_id)
            .cloned()
            .collect();
        for key in keys {
            self.stop(&key).await?;
        }
        Ok(())
    }

    /// Feed a gateway-observed upstream failure into the health strikes.
    pub async fn note_upstream_failure(&self, key: &InstanceKey) {
        let Some(handle) = self.instances.read().await.get(key).cloned() else {
            return;
        };
        if *handle.status.read().await != InstanceStatus::Running {
            return;
        }
        let strikes = handle.health_strikes.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(instance = %key, strikes, "upstream failure reported by gateway");
        if strikes >= self.timings.health_strikes {
            self.declare_dead(&handle, "upstream-unreachable", None).await;
        }
    }

    /// Ports currently reserved by the allocator (diagnostics and tests).
    pub async fn reserved_ports(&self) -> std::collections::HashSet<u16> {
        self.ports.reserved().await
    }

    // ── Per-key serialization ───────────────────────────────────────────

    async fn lock_key(&self, key: &InstanceKey) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        eprintln!("DBG lock_key enter {key}");
        let lock = {
            let mut locks = self.key_locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let r = tokio::time::timeout(self.timings.key_lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                Error::InstanceBusy(format!("another operation is in flight for {key}"))
            });
        eprintln!("DBG lock_key exit {key} ok={}", r.is_ok());
        r
    }

    async fn start_inner(
        &self,
        key: &InstanceKey,
        manual: bool,
    ) -> Result<InstanceSnapshot> {
        let _guard = self.lock_key(key).await?;
        if manual {
            self.retry_history.lock().await.remove(key);
        }
        self.locked_start(key).await
    }

    // ── Start path (per-key lock held) ──────────────────────────────────

    async fn locked_start(&self, key: &InstanceKey) -> Result<InstanceSnapshot> {
        if let Some(existing) = self.instances.read().await.get(key).cloned() {
            match *existing.status.read().await {
                InstanceStatus::Starting | InstanceStatus::Running => {
                    debug!(instance = %key, "start is a no-op, instance already live");
                    return Ok(existing.snapshot().await);
                },
                InstanceStatus::Stopped | InstanceStatus::Error => {
                    existing.abort_watchers().await;
                    self.release_port(&existing).await;
                    self.instances.write().await.remove(key);
                },
            }
        }

        let server = self.servers.require(&key.server_id).await?;
        let workspace = self.workspaces.require(&key.workspace_id).await?;
        if !workspace.is_global()
            && !self
                .workspaces
                .is_enabled(&key.workspace_id, &key.server_id)
                .await
        {
            return Err(Error::ServerDisabledForWorkspace {
                server_id: key.server_id.clone(),
                workspace_id: key.workspace_id.clone(),
            });
        }

        let port = self.ports.reserve().await?;
        let handle = InstanceHandle::new(key.clone(), port);
        self.instances
            .write()
            .await
            .insert(key.clone(), Arc::clone(&handle));
        self.events.emit_server(
            ServerEventKind::Started,
            &key.server_id,
            Some(key.workspace_id.clone()),
            Some(serde_json::json!({ "port": port })),
        );
        info!(instance = %key, port, "starting instance");

        if let Err(e) = self.spawn_child(&handle, &server, &workspace).await {
            self.fail_starting(&handle, "spawn-failed").await;
            self.schedule_retry(key.clone()).await;
            return Err(e);
        }

        if let Err(e) = probe::wait_ready(&self.http, port, &self.timings).await {
            self.kill_child(&handle).await;
            self.fail_starting(&handle, "readiness-timeout").await;
            self.schedule_retry(key.clone()).await;
            return Err(e);
        }

        let metadata =
            probe::fetch_metadata(&self.http, port, self.timings.health_timeout).await;
        if let Some(metadata) = &metadata {
            let _ = self
                .servers
                .set_counts(
                    &key.server_id,
                    metadata.tools.len() as u32,
                    metadata.resources.len() as u32,
                    metadata.prompts.len() as u32,
                )
                .await;
        }
        *handle.metadata.write().await = metadata;
        *handle.last_ready_at.write().await = Some(now_ms());
        *handle.status.write().await = InstanceStatus::Running;
        handle.health_strikes.store(0, Ordering::SeqCst);

        self.spawn_exit_watcher(&handle).await;
        self.spawn_health_watcher(&handle).await;

        info!(instance = %key, port, "instance running");
        Ok(handle.snapshot().await)
    }

    async fn spawn_child(
        &self,
        handle: &Arc<InstanceHandle>,
        server: &ServerRecord,
        workspace: &Workspace,
    ) -> Result<()> {
        let key = &handle.key;
        let profile = self
            .permissions
            .effective(&key.workspace_id, &key.server_id)
            .await;
        if profile.is_legacy() {
            warn!(
                instance = %key,
                "no permission profile stored, passing parent environment unfiltered"
            );
        }
        let secrets = self
            .secrets
            .effective(&key.workspace_id, &key.server_id)
            .await;
        let user = self.profile.get().await;
        let parent: HashMap<String, String> = std::env::vars().collect();
        let child_env = env::compose(
            &profile,
            workspace,
            user.as_ref(),
            &secrets,
            &parent,
            handle.port,
        );

        let server_root = self.data_dir.join("servers").join(&server.id);
        std::fs::create_dir_all(&server_root).map_err(|e| {
            Error::SpawnFailed(format!("cannot create {}: {e}", server_root.display()))
        })?;
        let command = command::build(server, &server_root)?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .env_clear()
            .envs(&child_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::SpawnFailed(format!("failed to spawn '{}': {e}", command.program))
            })?;

        *handle.pid.write().await = child.id();
        {
            let mut watchers = handle.watchers.lock().await;
            if let Some(stdout) = child.stdout.take() {
                watchers.push(logs::spawn_reader(stdout, Arc::clone(&handle.stdout)));
            }
            if let Some(stderr) = child.stderr.take() {
                watchers.push(logs::spawn_reader(stderr, Arc::clone(&handle.stderr)));
            }
        }
        *handle.child.lock().await = Some(child);
        Ok(())
    }

    /// Record the error state for an instance that never reached `running`
    /// and return its port.
    async fn fail_starting(&self, handle: &Arc<InstanceHandle>, reason: &str) {
        *handle.status.write().await = InstanceStatus::Error;
        self.release_port(handle).await;
        let stderr_tail = handle.stderr.tail(20).await;
        self.events.emit_server(
            ServerEventKind::Crashed,
            &handle.key.server_id,
            Some(handle.key.workspace_id.clone()),
            Some(serde_json::json!({
                "reason": reason,
                "stderrTail": stderr_tail,
            })),
        );
    }

    // ── Death handling ─────────────────────────────────────────────────

    /// Move a running instance to `error`, exactly once. Releases the
    /// port, emits `crashed`, and schedules the auto-retry. Watchers are
    /// not aborted here — they observe the status change and exit on their
    /// own, which keeps this safe to call from a watcher task.
    async fn declare_dead(
        &self,
        handle: &Arc<InstanceHandle>,
        reason: &str,
        exit_code: Option<i32>,
    ) {
        {
            let mut status = handle.status.write().await;
            if matches!(*status, InstanceStatus::Error | InstanceStatus::Stopped) {
                return;
            }
            *status = InstanceStatus::Error;
        }
        self.kill_child(handle).await;
        self.release_port(handle).await;

        let stderr_tail = handle.stderr.tail(20).await;
        warn!(instance = %handle.key, reason, ?exit_code, "instance died");
        self.events.emit_server(
            ServerEventKind::Crashed,
            &handle.key.server_id,
            Some(handle.key.workspace_id.clone()),
            Some(serde_json::json!({
                "reason": reason,
                "exitCode": exit_code,
                "stderrTail": stderr_tail,
            })),
        );
        self.schedule_retry(handle.key.clone()).await;
    }

    async fn spawn_exit_watcher(&self, handle: &Arc<InstanceHandle>) {
        let Some(supervisor) = self.weak.upgrade() else {
            return;
        };
        let watched = Arc::clone(handle);
        let watcher = tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                if watched.stopping.load(Ordering::SeqCst)
                    || *watched.status.read().await != InstanceStatus::Running
                {
                    return;
                }
                let exit = {
                    let mut child = watched.child.lock().await;
                    match child.as_mut() {
                        Some(child) => child.try_wait().ok().flatten(),
                        None => return,
                    }
                };
                if let Some(status) = exit {
                    if watched.stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    supervisor.declare_dead(&watched, "exit", status.code()).await;
                    return;
                }
            }
        });
        handle.watchers.lock().await.push(watcher);
    }

    async fn spawn_health_watcher(&self, handle: &Arc<InstanceHandle>) {
        let Some(supervisor) = self.weak.upgrade() else {
            return;
        };
        let watched = Arc::clone(handle);
        let interval = self.timings.health_interval;
        let timeout = self.timings.health_timeout;
        let strikes_limit = self.timings.health_strikes;
        let watcher = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if watched.stopping.load(Ordering::SeqCst)
                    || *watched.status.read().await != InstanceStatus::Running
                {
                    return;
                }
                if probe::check_health(&supervisor.http, watched.port, timeout).await {
                    watched.health_strikes.store(0, Ordering::SeqCst);
                    *watched.last_ready_at.write().await = Some(now_ms());
                } else {
                    let strikes = watched.health_strikes.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(instance = %watched.key, strikes, "health probe failed");
                    if strikes >= strikes_limit {
                        supervisor.declare_dead(&watched, "health", None).await;
                        return;
                    }
                }
            }
        });
        handle.watchers.lock().await.push(watcher);
    }

    // ── Auto-retry ─────────────────────────────────────────────────────

    fn schedule_retry(
        &self,
        key: InstanceKey,
    ) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        let attempt = {
            let mut history = self.retry_history.lock().await;
            let attempts = history.entry(key.clone()).or_default();
            let cutoff = Instant::now()
                .checked_sub(self.timings.retry_window)
                .unwrap_or_else(Instant::now);
            attempts.retain(|t| *t > cutoff);
            if attempts.len() as u32 >= self.timings.retry_max_attempts {
                warn!(
                    instance = %key,
                    attempts = attempts.len(),
                    "auto-retry budget exhausted, staying in error until manual start"
                );
                return;
            }
            attempts.push(Instant::now());
            attempts.len() as u32 - 1
        };

        if let Some(handle) = self.instances.read().await.get(&key).cloned() {
            handle.retry_count.store(attempt + 1, Ordering::Relaxed);
        }

        let delay = self.timings.retry_delay(attempt);
        info!(instance = %key, attempt = attempt + 1, ?delay, "scheduling auto-retry");
        let Some(supervisor) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Manual intervention (start/stop/restart) cancels the retry by
            // moving the instance out of error.
            if supervisor.status(&key).await != Some(InstanceStatus::Error) {
                return;
            }
            info!(instance = %key, "auto-retrying");
            if let Err(e) = supervisor.start_inner(&key, false).await {
                warn!(instance = %key, error = %e, "auto-retry failed");
            }
        });
        })
    }

    // ── Stop path (per-key lock held) ──────────────────────────────────

    async fn locked_stop(&self, key: &InstanceKey) -> Result<()> {
        let Some(handle) = self.instances.write().await.remove(key) else {
            return Ok(());
        };
        handle.stopping.store(true, Ordering::SeqCst);
        handle.abort_watchers().await;
        self.terminate_child(&handle).await;
        *handle.status.write().await = InstanceStatus::Stopped;
        self.release_port(&handle).await;
        self.events.emit_server(
            ServerEventKind::Stopped,
            &key.server_id,
            Some(key.workspace_id.clone()),
            None,
        );
        info!(instance = %key, "instance stopped");
        Ok(())
    }

    /// Polite termination, then the hammer after the grace period.
    async fn terminate_child(&self, handle: &Arc<InstanceHandle>) {
        let child = handle.child.lock().await.take();
        let Some(mut child) = child else {
            return;
        };

        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                use nix::{
                    sys::signal::{Signal, kill},
                    unistd::Pid,
                };
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
            match tokio::time::timeout(self.timings.stop_grace, child.wait()).await {
                Ok(_) => {},
                Err(_) => {
                    warn!(instance = %handle.key, "grace period elapsed, killing child");
                    let _ = child.kill().await;
                },
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill().await;
        }
    }

    async fn kill_child(&self, handle: &Arc<InstanceHandle>) {
        if let Some(mut child) = handle.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }

    async fn release_port(&self, handle: &Arc<InstanceHandle>) {
        if !handle.port_released.swap(true, Ordering::SeqCst) {
            self.ports.release(handle.port).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use {
        mcphost_config::PortRange,
        mcphost_events::{BusEvent, Topic},
        mcphost_store::{InstallType, NewServer, NewWorkspace, ServerConfigPatch},
    };

    struct Fixture {
        supervisor: Arc<ProcessSupervisor>,
        servers: Arc<ServerStore>,
        workspaces: Arc<WorkspaceStore>,
        events: EventBus,
        _dir: tempfile::TempDir,
    }

    fn fast_timings(retry_max_attempts: u32) -> SupervisorTimings {
        SupervisorTimings {
            readiness_deadline: Duration::from_millis(300),
            readiness_initial_interval: Duration::from_millis(20),
            readiness_max_interval: Duration::from_millis(50),
            health_interval: Duration::from_millis(50),
            health_timeout: Duration::from_millis(100),
            stop_grace: Duration::from_millis(200),
            stop_all_deadline: Duration::from_secs(2),
            retry_base: Duration::from_millis(10),
            retry_cap: Duration::from_millis(50),
            retry_max_attempts,
            retry_window: Duration::from_secs(60),
            key_lock_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn fixture(timings: SupervisorTimings, port_low: u16) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path();
        let servers = Arc::new(ServerStore::open(&path.join("servers.json")).unwrap());
        let workspaces = Arc::new(WorkspaceStore::open(&path.join("workspaces.json")).unwrap());
        let secrets = Arc::new(SecretStore::open(&path.join("secrets.json")).unwrap());
        let permissions =
            Arc::new(PermissionStore::open(&path.join("permissions.json")).unwrap());
        let profile = Arc::new(ProfileStore::open(&path.join("profile.json")).unwrap());
        let events = EventBus::new();
        let ports = Arc::new(PortAllocator::new(
            PortRange {
                low: port_low,
                high: port_low + 99,
            },
            Duration::from_millis(50),
        ));
        let supervisor = ProcessSupervisor::new(
            timings,
            path.to_path_buf(),
            ports,
            Arc::clone(&servers),
            Arc::clone(&workspaces),
            secrets,
            permissions,
            profile,
            events.clone(),
        );
        Fixture {
            supervisor,
            servers,
            workspaces,
            events,
            _dir: dir,
        }
    }

    /// A local server whose directory has no package.json, so command
    /// resolution fails deterministically before any process exists.
    async fn broken_server(fx: &Fixture) -> String {
        let dir = fx._dir.path().join("broken");
        std::fs::create_dir_all(&dir).unwrap();
        let record = fx
            .servers
            .create(NewServer {
                name: Some("broken".into()),
                install_type: InstallType::Local,
                package_name: None,
                package_version: None,
                local_path: Some(dir),
                entry_point: None,
                default_config: None,
            })
            .await
            .unwrap();
        record.id
    }

    #[tokio::test]
    async fn start_unknown_server_is_not_found() {
        let fx = fixture(fast_timings(0), 43_000);
        let err = fx
            .supervisor
            .start(&InstanceKey::new("ghost", "global"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NotFound");
        assert!(fx.supervisor.list().await.is_empty());
        assert!(fx.supervisor.reserved_ports().await.is_empty());
    }

    #[tokio::test]
    async fn start_disabled_for_workspace_is_rejected() {
        let fx = fixture(fast_timings(0), 43_100);
        let server_id = broken_server(&fx).await;
        let ws = fx
            .workspaces
            .create(NewWorkspace {
                label: "App".into(),
                project_root: "/projects/app".into(),
                auto_cleanup: false,
                source: None,
                session_ttl_secs: None,
            })
            .await
            .unwrap();
        fx.workspaces
            .patch_server_config(&ws.id, &server_id, ServerConfigPatch {
                enabled: Some(false),
                context_headers: None,
            })
            .await
            .unwrap();

        let err = fx
            .supervisor
            .start(&InstanceKey::new(server_id, ws.id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ServerDisabledForWorkspace");
        assert!(fx.supervisor.reserved_ports().await.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_releases_port_and_lands_in_error() {
        let fx = fixture(fast_timings(0), 43_200);
        let server_id = broken_server(&fx).await;
        let key = InstanceKey::new(server_id.clone(), "global");
        let mut sub = fx.events.subscribe(Topic::ServerEvents);

        let err = fx.supervisor.start(&key).await.unwrap_err();
        assert_eq!(err.code(), "SpawnFailed");
        assert_eq!(
            fx.supervisor.status(&key).await,
            Some(InstanceStatus::Error)
        );
        assert!(fx.supervisor.reserved_ports().await.is_empty());

        // started then crashed, in order.
        let BusEvent::ServerEvent(first) = sub.recv().await.unwrap() else {
            panic!("expected server event");
        };
        assert_eq!(first.kind, ServerEventKind::Started);
        let BusEvent::ServerEvent(second) = sub.recv().await.unwrap() else {
            panic!("expected server event");
        };
        assert_eq!(second.kind, ServerEventKind::Crashed);
        assert_eq!(second.server_id, server_id);
    }

    #[tokio::test]
    async fn auto_retry_is_bounded() {
        let fx = fixture(fast_timings(2), 43_300);
        let server_id = broken_server(&fx).await;
        let key = InstanceKey::new(server_id, "global");

        let _ = fx.supervisor.start(&key).await;
        // Budget is 2 attempts at 10–20ms backoff; give the retries time to
        // burn out, then confirm the instance settled in error.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(
            fx.supervisor.status(&key).await,
            Some(InstanceStatus::Error)
        );
        let snapshot = fx.supervisor.get(&key).await.unwrap();
        assert!(snapshot.retry_count <= 2);
        assert!(fx.supervisor.reserved_ports().await.is_empty());
    }

    #[tokio::test]
    async fn stop_on_absent_key_is_idempotent() {
        let fx = fixture(fast_timings(0), 43_400);
        fx.supervisor
            .stop(&InstanceKey::new("nope", "global"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stop_clears_error_instance() {
        let fx = fixture(fast_timings(0), 43_500);
        let server_id = broken_server(&fx).await;
        let key = InstanceKey::new(server_id, "global");
        let _ = fx.supervisor.start(&key).await;

        fx.supervisor.stop(&key).await.unwrap();
        assert!(fx.supervisor.get(&key).await.is_none());
        assert!(fx.supervisor.reserved_ports().await.is_empty());
    }

    #[tokio::test]
    async fn stop_all_with_no_instances_returns_immediately() {
        let fx = fixture(fast_timings(0), 43_600);
        fx.supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn reservations_match_live_instances() {
        let fx = fixture(fast_timings(0), 43_700);
        let server_id = broken_server(&fx).await;
        let key = InstanceKey::new(server_id, "global");
        let _ = fx.supervisor.start(&key).await;

        // No retries configured: the failed start must not leak its
        // reservation, and no running instance exists.
        let live_ports: std::collections::HashSet<u16> = fx
            .supervisor
            .list()
            .await
            .into_iter()
            .filter(|i| i.status == InstanceStatus::Running)
            .map(|i| i.port)
            .collect();
        assert_eq!(fx.supervisor.reserved_ports().await, live_ports);
    }
}
