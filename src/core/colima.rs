//! Colima service - Instance reconciliation and lifecycle dispatch
//!
//! Merges declared profiles (scanner) with live daemon processes (sampler),
//! overlays in-flight transitions, and publishes the result as an atomic
//! list replacement. Lifecycle actions register a transition, patch the
//! published list optimistically for immediate feedback, and dispatch the
//! colima command on a worker thread; the poller observes the outcome.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use super::command::CommandRunner;
use super::instance::{sort_instances, VmInstance, VmStatus};
use super::sampler::ProcessSampler;
use super::scanner::{DeclaredProfile, ProfileScanner};
use super::transition::{TransitionTracker, INSTANCE_SETTLE_DWELL};
use crate::persistence::{EngineSettings, SettingsStore};

/// Baseline poll interval.
pub const SLOW_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll interval while a transition is in flight.
pub const FAST_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Reconciles colima instance state and drives lifecycle actions.
pub struct ColimaService {
    runner: Arc<dyn CommandRunner>,
    store: SettingsStore,
    settings: Arc<RwLock<EngineSettings>>,
    scanner: Arc<RwLock<ProfileScanner>>,
    sampler: Arc<Mutex<ProcessSampler>>,
    tracker: Arc<Mutex<TransitionTracker<VmStatus>>>,
    instances: Arc<RwLock<Vec<VmInstance>>>,
    subscribers: Arc<RwLock<Vec<Sender<Vec<VmInstance>>>>>,
    shutdown: Arc<AtomicBool>,
    poll_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ColimaService {
    pub fn new(runner: Arc<dyn CommandRunner>, store: SettingsStore) -> Self {
        let settings = store.load();
        let root = match settings.colima_user.as_deref() {
            Some(user) => ProfileScanner::root_for_user(user),
            None => ProfileScanner::default_root(),
        };
        Self {
            runner,
            store,
            settings: Arc::new(RwLock::new(settings)),
            scanner: Arc::new(RwLock::new(ProfileScanner::new(root))),
            sampler: Arc::new(Mutex::new(ProcessSampler::new())),
            tracker: Arc::new(Mutex::new(TransitionTracker::new(INSTANCE_SETTLE_DWELL))),
            instances: Arc::new(RwLock::new(Vec::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
            poll_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Current published instance list.
    pub fn instances(&self) -> Vec<VmInstance> {
        self.instances.read().map(|i| i.clone()).unwrap_or_default()
    }

    /// Receive a full list snapshot after every publish.
    pub fn subscribe(&self) -> Receiver<Vec<VmInstance>> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.write() {
            subs.push(tx);
        }
        rx
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// One full reconciliation pass. External failures degrade to an empty
    /// list; this never raises to the caller.
    pub fn refresh(&self) {
        let declared = self
            .scanner
            .read()
            .map(|s| s.scan())
            .unwrap_or_default();
        let running = self
            .sampler
            .lock()
            .map(|mut s| s.running_profiles())
            .unwrap_or_default();

        let mut merged = merge_instances(declared, &running);
        if let Ok(mut tracker) = self.tracker.lock() {
            overlay_transitions(&mut merged, &mut tracker);
        }

        if let Ok(mut instances) = self.instances.write() {
            *instances = merged.clone();
        }
        self.notify(merged);
    }

    /// Start a profile: Starting now, Running expected.
    pub fn start(&self, profile: &str) -> Result<()> {
        info!(profile, "starting instance");
        self.begin_action(profile, VmStatus::Starting, VmStatus::Running)?;
        self.dispatch("start", profile);
        Ok(())
    }

    /// Stop a profile: Stopping now, Stopped expected.
    pub fn stop(&self, profile: &str) -> Result<()> {
        info!(profile, "stopping instance");
        self.begin_action(profile, VmStatus::Stopping, VmStatus::Stopped)?;
        self.dispatch("stop", profile);
        Ok(())
    }

    /// Configure the operating user. A nonexistent account is rejected and
    /// the previous configuration is left untouched.
    pub fn set_colima_user(&self, user: Option<&str>) -> Result<()> {
        if let Some(name) = user {
            let probe = self
                .runner
                .run("id", &["-u", name], &[])
                .with_context(|| format!("could not verify user '{name}'"))?;
            if !probe.success {
                bail!("no such user: {name}");
            }
        }

        let updated = {
            let mut settings = self
                .settings
                .write()
                .map_err(|e| anyhow::anyhow!("settings lock poisoned: {}", e))?;
            settings.colima_user = user.map(str::to_string);
            settings.clone()
        };
        self.store.save(&updated);

        let root = match user {
            Some(name) => ProfileScanner::root_for_user(name),
            None => ProfileScanner::default_root(),
        };
        if let Ok(mut scanner) = self.scanner.write() {
            *scanner = ProfileScanner::new(root);
        }
        info!(user = ?user, "colima user configured");
        Ok(())
    }

    pub fn set_auto_fix_socket_permissions(&self, enabled: bool) -> Result<()> {
        let updated = {
            let mut settings = self
                .settings
                .write()
                .map_err(|e| anyhow::anyhow!("settings lock poisoned: {}", e))?;
            settings.auto_fix_socket_permissions = enabled;
            settings.clone()
        };
        self.store.save(&updated);
        Ok(())
    }

    /// `DOCKER_HOST` value for the configured user's socket, when one is set.
    pub fn docker_host(&self) -> Option<String> {
        let settings = self.settings();
        settings
            .colima_user
            .map(|user| format!("unix://{}", docker_socket_path(&user).display()))
    }

    /// Spawn the poll loop: 1s ticks while a transition is in flight, 5s
    /// otherwise. Idempotent.
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
                    let interval = if service.has_pending_transitions() {
                        FAST_POLL_INTERVAL
                    } else {
                        SLOW_POLL_INTERVAL
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

    fn has_pending_transitions(&self) -> bool {
        self.tracker.lock().map(|t| !t.is_empty()).unwrap_or(false)
    }

    /// Register the transition and patch the published list in place so the
    /// frontend reflects the action before the next authoritative refresh.
    fn begin_action(&self, profile: &str, display: VmStatus, expected: VmStatus) -> Result<()> {
        self.tracker
            .lock()
            .map_err(|e| anyhow::anyhow!("tracker lock poisoned: {}", e))?
            .begin(profile, display, expected);

        let snapshot = {
            let mut instances = self
                .instances
                .write()
                .map_err(|e| anyhow::anyhow!("instances lock poisoned: {}", e))?;
            match instances.iter_mut().find(|i| i.name == profile) {
                Some(instance) => instance.status = display,
                None => {
                    instances.push(VmInstance::new(profile, display));
                    sort_instances(&mut instances);
                }
            }
            instances.clone()
        };
        self.notify(snapshot);
        Ok(())
    }

    fn dispatch(&self, verb: &'static str, profile: &str) {
        let runner = Arc::clone(&self.runner);
        let settings = self.settings();
        let profile = profile.to_string();
        std::thread::spawn(move || {
            dispatch_lifecycle(runner.as_ref(), &settings, verb, &profile);
        });
    }

    fn notify(&self, snapshot: Vec<VmInstance>) {
        if let Ok(mut subs) = self.subscribers.write() {
            subs.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

impl Clone for ColimaService {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            store: self.store.clone(),
            settings: Arc::clone(&self.settings),
            scanner: Arc::clone(&self.scanner),
            sampler: Arc::clone(&self.sampler),
            tracker: Arc::clone(&self.tracker),
            instances: Arc::clone(&self.instances),
            subscribers: Arc::clone(&self.subscribers),
            shutdown: Arc::clone(&self.shutdown),
            poll_handle: Arc::clone(&self.poll_handle),
        }
    }
}

/// Merge declared profiles with the sampled running set into a sorted,
/// unpublished instance list.
fn merge_instances(declared: Vec<DeclaredProfile>, running: &HashSet<String>) -> Vec<VmInstance> {
    let mut list: Vec<VmInstance> = declared
        .into_iter()
        .map(|profile| {
            let status = if running.contains(&profile.name) {
                VmStatus::Running
            } else {
                VmStatus::Stopped
            };
            VmInstance {
                name: profile.name,
                status,
                cpus: profile.cpus,
                memory_gib: profile.memory_gib,
                disk_gib: profile.disk_gib,
            }
        })
        .collect();

    // A profile can be running before its config materializes on disk.
    for name in running {
        if !list.iter().any(|i| &i.name == name) {
            list.push(VmInstance::undeclared(name.clone()));
        }
    }

    sort_instances(&mut list);
    list
}

/// Replace observed statuses with in-flight display statuses where a
/// transition exists; resource hints stay untouched.
fn overlay_transitions(instances: &mut [VmInstance], tracker: &mut TransitionTracker<VmStatus>) {
    for instance in instances {
        instance.status = tracker.reconcile(&instance.name, instance.status);
    }
}

/// The docker socket a colima installation exposes for a given user.
fn docker_socket_path(user: &str) -> std::path::PathBuf {
    ProfileScanner::root_for_user(user)
        .join("default")
        .join("docker.sock")
}

fn dispatch_lifecycle(
    runner: &dyn CommandRunner,
    settings: &EngineSettings,
    verb: &str,
    profile: &str,
) {
    match settings.colima_user.as_deref() {
        None => {
            // Same-user path: invoke directly; completion is observed by the
            // poller, not awaited here.
            if let Err(e) = runner.run("colima", &[verb, profile], &[]) {
                warn!(verb, profile, "colima command failed to launch: {}", e);
            }
        }
        Some(user) => {
            let mut line = format!("sudo -iu {user} colima {verb} {profile}");
            if verb == "start" && settings.auto_fix_socket_permissions {
                let socket = docker_socket_path(user);
                line.push_str(&format!(" && sudo chmod 666 {}", socket.display()));
            }
            launch_in_terminal(runner, &line);
        }
    }
}

/// Run a privileged command line through an interactive terminal so the user
/// can answer the sudo prompt.
fn launch_in_terminal(runner: &dyn CommandRunner, line: &str) {
    #[cfg(target_os = "macos")]
    {
        let script = format!(
            "tell application \"Terminal\" to do script \"{}\"",
            line.replace('"', "\\\"")
        );
        let activate = "tell application \"Terminal\" to activate";
        if let Err(e) = runner.run("osascript", &["-e", &script, "-e", activate], &[]) {
            warn!("failed to open terminal for privileged command: {}", e);
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        if let Err(e) = runner.run("sh", &["-c", line], &[]) {
            warn!("failed to run privileged command: {}", e);
        }
    }
}
