//! Docker service - Container reconciliation, pins, and daemon diagnostics
//!
//! Polls `docker ps` through the command layer, reconciles the pin set,
//! clears dispatched actions edge-triggered on status change, and classifies
//! daemon failures into actionable categories. Container actions get no dwell
//! floor; a 30 second fast-poll ceiling bounds how long a stuck action keeps
//! the engine polling hot.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::command::{CommandError, CommandRunner, LogStream};
use super::container::{Container, ContainerStatus, PsRecord};
use super::pins::PinSet;
use crate::persistence::PinStore;

/// Longest a dispatched container action keeps the poller on the fast
/// interval. Containers have no dwell floor, so this is the only bound on a
/// command that silently went nowhere.
pub const FAST_POLL_CEILING: Duration = Duration::from_secs(30);

const LOG_TAIL_LINES: &str = "100";

/// Why the docker daemon could not be reached, coarse enough to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableReason {
    /// The socket exists but this user may not open it.
    PermissionDenied,
    /// The daemon is not running behind the socket.
    DaemonNotRunning,
    /// The socket path does not exist at all.
    SocketNotFound,
    /// Anything the probe output did not match.
    Unknown,
}

impl UnreachableReason {
    /// Classify probe output by substring. Matching is case-insensitive and
    /// first-match-wins in the order below.
    pub fn classify(output: &str) -> Self {
        let lower = output.to_ascii_lowercase();
        if lower.contains("permission denied") {
            Self::PermissionDenied
        } else if lower.contains("cannot connect to the docker daemon")
            || lower.contains("is the docker daemon running")
        {
            Self::DaemonNotRunning
        } else if lower.contains("no such file or directory") {
            Self::SocketNotFound
        } else {
            Self::Unknown
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "no permission to open the docker socket",
            Self::DaemonNotRunning => "docker daemon is not running",
            Self::SocketNotFound => "docker socket not found",
            Self::Unknown => "docker daemon unreachable",
        }
    }
}

/// Everything a frontend needs to render the container section, published
/// atomically after each refresh.
#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    /// Youngest first; ties keep ordinal name order.
    pub containers: Vec<Container>,
    /// Ordered pinned ids.
    pub pinned: Vec<String>,
    /// Ids with an action dispatched and not yet observed to land.
    pub pending: HashSet<String>,
    /// Set when the daemon could not be reached this cycle.
    pub unreachable: Option<UnreachableReason>,
}

/// Result of an on-demand reachability probe.
#[derive(Debug, Clone)]
pub struct DaemonDiagnosis {
    pub reachable: bool,
    pub reason: Option<UnreachableReason>,
    /// Raw probe output for display.
    pub detail: String,
}

/// Reconciles docker container state, the pin set, and dispatched actions.
pub struct DockerService {
    runner: Arc<dyn CommandRunner>,
    pin_store: PinStore,
    pins: Arc<RwLock<PinSet>>,
    containers: Arc<RwLock<Vec<Container>>>,
    /// Dispatch-time status per container id. An entry clears when the
    /// observed status differs from it, or the container disappears.
    pending: Arc<Mutex<HashMap<String, ContainerStatus>>>,
    unreachable: Arc<RwLock<Option<UnreachableReason>>>,
    docker_host: Arc<RwLock<Option<String>>>,
    fast_until: Arc<Mutex<Option<Instant>>>,
    subscribers: Arc<RwLock<Vec<Sender<ContainerSnapshot>>>>,
    shutdown: Arc<AtomicBool>,
    poll_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DockerService {
    pub fn new(runner: Arc<dyn CommandRunner>, pin_store: PinStore) -> Self {
        let pins = pin_store.load();
        Self {
            runner,
            pin_store,
            pins: Arc::new(RwLock::new(pins)),
            containers: Arc::new(RwLock::new(Vec::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            unreachable: Arc::new(RwLock::new(None)),
            docker_host: Arc::new(RwLock::new(None)),
            fast_until: Arc::new(Mutex::new(None)),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            poll_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Point the docker CLI at a specific socket. `None` falls back to the
    /// ambient docker context.
    pub fn set_docker_host(&self, host: Option<String>) {
        info!(host = ?host, "docker host configured");
        if let Ok(mut slot) = self.docker_host.write() {
            *slot = host;
        }
    }

    pub fn snapshot(&self) -> ContainerSnapshot {
        ContainerSnapshot {
            containers: self.containers.read().map(|c| c.clone()).unwrap_or_default(),
            pinned: self
                .pins
                .read()
                .map(|p| p.pinned().to_vec())
                .unwrap_or_default(),
            pending: self
                .pending
                .lock()
                .map(|p| p.keys().cloned().collect())
                .unwrap_or_default(),
            unreachable: self.unreachable.read().ok().and_then(|u| *u),
        }
    }

    /// Receive a snapshot after every publish.
    pub fn subscribe(&self) -> Receiver<ContainerSnapshot> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.write() {
            subs.push(tx);
        }
        rx
    }

    /// One full refresh: list containers, resolve pending actions, reconcile
    /// pins, publish. Never raises; an unreachable daemon publishes an empty
    /// list with the classified reason.
    pub fn refresh(&self) {
        let (mut containers, unreachable) = self.list_containers();

        containers.sort_by(|a, b| {
            (a.age_sort_key(), &a.name).cmp(&(b.age_sort_key(), &b.name))
        });

        self.resolve_pending(&containers);

        // An unreachable daemon says nothing about what is running, so the
        // pin set (and the manual-unpin memory in particular) stays untouched
        // until the runtime answers again.
        let pins_changed = if unreachable.is_none() {
            self.pins
                .write()
                .map(|mut pins| pins.reconcile(&containers))
                .unwrap_or(false)
        } else {
            false
        };
        if pins_changed {
            if let Ok(pins) = self.pins.read() {
                self.pin_store.save(&pins);
            }
        }

        if let Ok(mut slot) = self.containers.write() {
            *slot = containers;
        }
        if let Ok(mut slot) = self.unreachable.write() {
            *slot = unreachable;
        }
        self.notify();
    }

    /// Pin a container. At capacity the tiered eviction in [`PinSet`] makes
    /// room. Persisted immediately.
    pub fn pin(&self, id: &str) {
        let live = self.containers.read().map(|c| c.clone()).unwrap_or_default();
        let changed = self
            .pins
            .write()
            .map(|mut pins| pins.pin(id, &live))
            .unwrap_or(false);
        if changed {
            if let Ok(pins) = self.pins.read() {
                self.pin_store.save(&pins);
            }
            self.notify();
        }
    }

    /// Unpin a container and remember the choice so auto-pin leaves it alone
    /// while it stays running.
    pub fn unpin(&self, id: &str) {
        let changed = self
            .pins
            .write()
            .map(|mut pins| pins.unpin(id))
            .unwrap_or(false);
        if changed {
            if let Ok(pins) = self.pins.read() {
                self.pin_store.save(&pins);
            }
            self.notify();
        }
    }

    pub fn start_container(&self, id: &str) {
        self.dispatch("start", id);
    }

    pub fn stop_container(&self, id: &str) {
        self.dispatch("stop", id);
    }

    pub fn pause_container(&self, id: &str) {
        self.dispatch("pause", id);
    }

    pub fn unpause_container(&self, id: &str) {
        self.dispatch("unpause", id);
    }

    /// On-demand reachability probe with the raw output preserved for
    /// display.
    pub fn diagnose(&self) -> DaemonDiagnosis {
        match self.runner.run("docker", &["info"], &self.env()) {
            Ok(out) if out.success => DaemonDiagnosis {
                reachable: true,
                reason: None,
                detail: out.text,
            },
            Ok(out) => DaemonDiagnosis {
                reachable: false,
                reason: Some(UnreachableReason::classify(&out.text)),
                detail: out.text,
            },
            Err(e) => DaemonDiagnosis {
                reachable: false,
                reason: Some(UnreachableReason::Unknown),
                detail: e.to_string(),
            },
        }
    }

    /// Follow a container's logs. The returned stream terminates the
    /// subprocess on drop.
    pub fn stream_logs(&self, id: &str) -> Result<LogStream, CommandError> {
        let args = ["logs", "-f", "--tail", LOG_TAIL_LINES, id];
        self.runner.stream("docker", &args, &self.env())
    }

    /// Spawn the poll loop: 1s ticks while a dispatched action is pending and
    /// inside the fast ceiling, 5s otherwise. Idempotent.
    pub fn start_polling(&self) {
        let mut guard = match self.poll_handle.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if guard.is_some() {
            return;
        }
        self.shutdown.store(false, Ordering::Relaxed);

        let service = self.clone();
        *guard = Some(std::thread::spawn(move || {
            while !service.shutdown.load(Ordering::Relaxed) {
                service.refresh();

                let tick = Instant::now();
                loop {
                    if service.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let interval = if service.wants_fast_poll() {
                        super::colima::FAST_POLL_INTERVAL
                    } else {
                        super::colima::SLOW_POLL_INTERVAL
                    };
                    if tick.elapsed() >= interval {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }));
    }

    pub fn stop_polling(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.poll_handle.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }

    fn wants_fast_poll(&self) -> bool {
        let pending = self.pending.lock().map(|p| !p.is_empty()).unwrap_or(false);
        if !pending {
            return false;
        }
        self.fast_until
            .lock()
            .ok()
            .and_then(|f| *f)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    /// `docker ps -a` through the runner. Returns the parsed list plus the
    /// unreachable classification, if any. An empty listing triggers a
    /// `docker info` probe to tell "no containers" from "no daemon".
    fn list_containers(&self) -> (Vec<Container>, Option<UnreachableReason>) {
        let env = self.env();
        let args = ["ps", "-a", "--no-trunc", "--format", "{{json .}}"];
        let containers = match self.runner.run("docker", &args, &env) {
            Ok(out) if out.success => parse_ps_output(&out.text),
            Ok(out) => {
                debug!(code = ?out.code, "docker ps failed");
                Vec::new()
            }
            Err(e) => {
                debug!("docker ps did not run: {}", e);
                Vec::new()
            }
        };

        if !containers.is_empty() {
            return (containers, None);
        }

        match self.runner.run("docker", &["info"], &env) {
            Ok(out) if out.success => (containers, None),
            Ok(out) => (containers, Some(UnreachableReason::classify(&out.text))),
            Err(_) => (containers, Some(UnreachableReason::Unknown)),
        }
    }

    /// Edge-triggered completion: an action is done once the observed status
    /// is anything other than what it was at dispatch time.
    fn resolve_pending(&self, observed: &[Container]) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|id, dispatched| {
                observed
                    .iter()
                    .find(|c| &c.id == id)
                    .is_some_and(|c| c.status == *dispatched)
            });
        }
    }

    fn dispatch(&self, verb: &'static str, id: &str) {
        info!(verb, id, "dispatching container action");
        let status_now = self
            .containers
            .read()
            .ok()
            .and_then(|c| c.iter().find(|c| c.id == id).map(|c| c.status));

        // An id not in the published list is still marked pending; the next
        // refresh clears it through the disappearance path if it never shows
        // up, or on the first status edge if it does.
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id.to_string(), status_now.unwrap_or(ContainerStatus::Other));
        }
        if let Ok(mut fast_until) = self.fast_until.lock() {
            *fast_until = Some(Instant::now() + FAST_POLL_CEILING);
        }

        let runner = Arc::clone(&self.runner);
        let env = self.env();
        let id = id.to_string();
        std::thread::spawn(move || {
            if let Err(e) = runner.run("docker", &[verb, &id], &env) {
                warn!(verb, id, "docker command failed to launch: {}", e);
            }
        });
        self.notify();
    }

    fn env(&self) -> Vec<(String, String)> {
        self.docker_host
            .read()
            .ok()
            .and_then(|h| h.clone())
            .map(|host| vec![("DOCKER_HOST".to_string(), host)])
            .unwrap_or_default()
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        if let Ok(mut subs) = self.subscribers.write() {
            subs.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

impl Clone for DockerService {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            pin_store: self.pin_store.clone(),
            pins: Arc::clone(&self.pins),
            containers: Arc::clone(&self.containers),
            pending: Arc::clone(&self.pending),
            unreachable: Arc::clone(&self.unreachable),
            docker_host: Arc::clone(&self.docker_host),
            fast_until: Arc::clone(&self.fast_until),
            subscribers: Arc::clone(&self.subscribers),
            shutdown: Arc::clone(&self.shutdown),
            poll_handle: Arc::clone(&self.poll_handle),
        }
    }
}

/// Parse one-JSON-object-per-line `docker ps` output. Unparsable lines are
/// skipped with a warning rather than failing the cycle.
fn parse_ps_output(text: &str) -> Vec<Container> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<PsRecord>(line) {
            Ok(record) => Some(Container::from(record)),
            Err(e) => {
                warn!("skipping unparsable container record: {}", e);
                None
            }
        })
        .collect()
}
