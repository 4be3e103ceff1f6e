// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The guardian thread: periodically reconciles every guarded instance with
//! what the probe says about its server, starting and restarting servers as
//! needed, and drives the instances to STOPPED when the manager shuts down.

use crate::instance::{CRASH_RESTART_WINDOW, InstanceGuard, RESTART_RETRY};
use crate::instance_map::InstanceMap;
use crate::state::InstanceState;
use crate::thread_registry::{ThreadInfo, ThreadRegistry, WaitOutcome};
use log::{debug, error, info, warn};
use nix::sys::signal::Signal;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_MONITORING_INTERVAL: Duration = Duration::from_secs(20);
/// Sweep period once shutdown has been requested.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Pause after the registry reported shutdown, so the loop does not spin.
const SHUTDOWN_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Default)]
struct GuardianFlags {
    shutdown_requested: bool,
    stopped: bool,
    pinged: bool,
}

/// Flags and condition variable shared with the callbacks handed to
/// instance monitors.
#[derive(Default)]
struct Wakeup {
    flags: Mutex<GuardianFlags>,
    cond: Arc<Condvar>,
}

impl Wakeup {
    fn ping(&self) {
        self.flags.lock().pinged = true;
        self.cond.notify_all();
    }
}

pub struct Guardian {
    map: Arc<InstanceMap>,
    registry: Arc<ThreadRegistry>,
    monitoring_interval: Duration,
    wakeup: Arc<Wakeup>,
}

impl Guardian {
    pub fn new(
        map: Arc<InstanceMap>,
        registry: Arc<ThreadRegistry>,
        monitoring_interval: Duration,
    ) -> Self {
        Self {
            map,
            registry,
            monitoring_interval,
            wakeup: Arc::new(Wakeup::default()),
        }
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let guardian = Arc::clone(self);
        self.registry.spawn("guardian", move |info| guardian.run(info))
    }

    /// Wakes the guardian for an immediate sweep.
    pub fn ping(&self) {
        self.wakeup.ping();
    }

    /// A callback that pings this guardian, for instance monitor threads.
    pub fn pinger(&self) -> impl FnOnce() + Send + 'static {
        let wakeup = Arc::clone(&self.wakeup);
        move || wakeup.ping()
    }

    pub fn is_stopped(&self) -> bool {
        self.wakeup.flags.lock().stopped
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.wakeup.flags.lock().shutdown_requested
    }

    /// Moves every guarded instance towards STOPPED and makes the guardian
    /// leave once they all got there.
    pub fn request_shutdown(&self) {
        info!("guardian: stopping guarded instances");
        {
            let map = self.map.lock();
            let now = Instant::now();
            for instance in map.instances() {
                let mut guard = instance.lock();
                if !guard.is_guarded()
                    || matches!(guard.state(), InstanceState::Stopped | InstanceState::Stopping)
                {
                    continue;
                }
                if guard.is_monitoring_thread_active() || guard.is_mysqld_running() {
                    guard.set_state(InstanceState::Stopping);
                    guard.last_checked = Some(now);
                    if let Err(e) = guard.kill_mysqld(Signal::SIGTERM) {
                        warn!("[{}] {e}", guard.name());
                    }
                } else {
                    guard.set_state(InstanceState::Stopped);
                }
            }
        }
        let mut flags = self.wakeup.flags.lock();
        flags.shutdown_requested = true;
        flags.pinged = true;
        self.wakeup.cond.notify_all();
    }

    fn run(self: Arc<Self>, info: ThreadInfo) {
        info!(
            "guardian started (monitoring-interval={}s)",
            self.monitoring_interval.as_secs()
        );
        loop {
            let all_stopped = self.sweep(Instant::now());

            let mut flags = self.wakeup.flags.lock();
            if flags.shutdown_requested && all_stopped {
                flags.stopped = true;
                break;
            }
            if !flags.pinged {
                let interval = if flags.shutdown_requested {
                    SHUTDOWN_POLL_INTERVAL
                } else {
                    self.monitoring_interval
                };
                let deadline = Instant::now() + interval;
                if self.registry.cond_timedwait(&info, &self.wakeup.cond, &mut flags, deadline)
                    == WaitOutcome::Shutdown
                {
                    let requested = flags.shutdown_requested;
                    MutexGuard::unlocked(&mut flags, || {
                        if !requested {
                            warn!("guardian: registry shut down before the instances were stopped");
                            self.request_shutdown();
                        }
                        std::thread::sleep(SHUTDOWN_SETTLE);
                    });
                }
            }
            flags.pinged = false;
        }
        info!("guardian stopped");
        drop(info);
        self.registry.request_shutdown();
    }

    /// One pass over the guarded instances. Returns whether every guarded
    /// instance is STOPPED.
    pub(crate) fn sweep(&self, now: Instant) -> bool {
        let map = self.map.lock();
        let mut all_stopped = true;
        for instance in map.instances() {
            let mut guard = instance.lock();
            if !guard.is_guarded() || guard.state() == InstanceState::Stopped {
                continue;
            }
            self.process_instance(&mut guard, now);
            if guard.state() != InstanceState::Stopped {
                all_stopped = false;
            }
        }
        all_stopped
    }

    pub(crate) fn process_instance(&self, guard: &mut InstanceGuard<'_>, now: Instant) {
        use InstanceState::*;

        if guard.state() == Stopping {
            self.process_stopping(guard, now);
            return;
        }

        if guard.is_mysqld_running() {
            match guard.state() {
                Started => {}
                Starting => {
                    let pid_file_exists =
                        guard.options().pid_file().is_some_and(|p| p.exists());
                    if pid_file_exists {
                        info!("[{}] online", guard.name());
                        guard.set_state(Started);
                        guard.reset_stat();
                    }
                }
                _ => {
                    info!("[{}] online", guard.name());
                    guard.set_state(Started);
                    guard.reset_stat();
                }
            }
            return;
        }

        match guard.state() {
            NotStarted => {
                guard.set_state(Starting);
                self.start_instance(guard, "starting");
            }
            Starting => {
                if guard.is_crashed() {
                    warn!("[{}] exited while starting", guard.name());
                    guard.set_state(JustCrashed);
                    guard.crash_moment = Some(now);
                }
            }
            Started => {
                warn!("[{}] crashed", guard.name());
                guard.set_state(JustCrashed);
                guard.crash_moment = Some(now);
            }
            JustCrashed => {
                let elapsed = guard
                    .crash_moment
                    .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
                if elapsed < CRASH_RESTART_WINDOW {
                    if guard.is_crashed() {
                        self.start_instance(guard, "restarting");
                    }
                } else {
                    guard.set_state(Crashed);
                }
            }
            Crashed => {
                let due = guard
                    .last_checked
                    .is_none_or(|t| now.saturating_duration_since(t) >= self.monitoring_interval);
                if !due {
                    return;
                }
                if guard.restart_counter < RESTART_RETRY {
                    if guard.is_crashed() {
                        guard.restart_counter += 1;
                        guard.last_checked = Some(now);
                        let attempt = format!("restart attempt {}", guard.restart_counter);
                        self.start_instance(guard, &attempt);
                    }
                } else {
                    error!(
                        "[{}] abandoned after {RESTART_RETRY} restart attempts",
                        guard.name()
                    );
                    guard.set_state(CrashedAndAbandoned);
                }
            }
            CrashedAndAbandoned | Stopped | Stopping => {}
        }
    }

    fn process_stopping(&self, guard: &mut InstanceGuard<'_>, now: Instant) {
        if !guard.is_monitoring_thread_active() && !guard.is_mysqld_running() {
            info!("[{}] stopped", guard.name());
            guard.set_state(InstanceState::Stopped);
            return;
        }
        let waited = guard
            .last_checked
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        if waited < guard.options().shutdown_delay() {
            return;
        }
        warn!(
            "[{}] still running after {}s, sending SIGKILL",
            guard.name(),
            waited.as_secs()
        );
        if let Err(e) = guard.kill_mysqld(Signal::SIGKILL) {
            warn!("[{}] {e}", guard.name());
        }
        info!("[{}] pretend killed", guard.name());
        guard.set_state(InstanceState::Stopped);
    }

    /// A failed attempt leaves the instance crashed, so the restart rules
    /// and the retry ceiling apply to it like to any other crash.
    fn start_instance(&self, guard: &mut InstanceGuard<'_>, what: &str) {
        debug!("[{}] {what}", guard.name());
        if let Err(e) = guard.start_mysqld(self.pinger()) {
            error!("[{}] cannot start: {e}", guard.name());
        }
    }
}
