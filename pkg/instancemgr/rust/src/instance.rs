// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! One supervised database server.
//!
//! All mutable state lives behind the instance mutex and is only reachable
//! through [`InstanceGuard`], so every state change happens with the lock
//! held.

use crate::instance_options::{InstanceDefaults, InstanceOptions, is_manager_option};
use crate::option_file::NamedOption;
use crate::process::ProcessControl;
use crate::state::InstanceState;
use crate::thread_registry::ThreadRegistry;
use log::{debug, error, info, warn};
use nix::sys::signal::Signal;
use parking_lot::{Mutex, MutexGuard};
use std::fs;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Restarts attempted from CRASHED before the instance is abandoned.
pub const RESTART_RETRY: u32 = 100;
/// Window after a crash during which restarts are immediate.
pub const CRASH_RESTART_WINDOW: Duration = Duration::from_secs(2);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(300);

const MAX_NAME_LENGTH: usize = 64;
const MYSQLD_COMPATIBLE_NAME: &str = "mysqld";

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("malformed instance name '{0}'")]
    MalformedName(String),
    #[error("instance '{0}' already exists")]
    AlreadyExists(String),
    #[error("option '{0}' cannot be used with a mysqld-compatible instance")]
    IncompatibleOption(String),
    #[error("instance is misconfigured")]
    Misconfigured,
    #[error("cannot start monitor thread: {0}")]
    Spawn(io::Error),
    #[error("no pid file, cannot signal the server")]
    NoPid,
    #[error("failed to send {signal} to pid {pid}: {source}")]
    Signal {
        signal: Signal,
        pid: i32,
        source: io::Error,
    },
    #[error("server survived SIGTERM and SIGKILL")]
    StopFailed,
}

/// `mysqld` optionally followed by digits.
pub fn is_name_valid(name: &str) -> bool {
    name.len() <= MAX_NAME_LENGTH
        && name
            .strip_prefix(MYSQLD_COMPATIBLE_NAME)
            .is_some_and(|suffix| suffix.bytes().all(|b| b.is_ascii_digit()))
}

pub fn is_mysqld_compatible_name(name: &str) -> bool {
    name == MYSQLD_COMPATIBLE_NAME
}

pub struct Instance {
    name: String,
    mysqld_compatible: bool,
    defaults: InstanceDefaults,
    control: Arc<dyn ProcessControl>,
    registry: Arc<ThreadRegistry>,
    inner: Mutex<InstanceInner>,
}

pub struct InstanceInner {
    options: InstanceOptions,
    state: InstanceState,
    crashed: bool,
    monitoring_thread_active: bool,
    configured: bool,
    pub(crate) restart_counter: u32,
    pub(crate) crash_moment: Option<Instant>,
    pub(crate) last_checked: Option<Instant>,
}

impl Instance {
    /// Builds an instance from its option-file section. Name and option
    /// compatibility errors are fatal; a failure to resolve the server binary
    /// only marks the instance as misconfigured.
    pub fn new(
        name: &str,
        options: Vec<NamedOption>,
        initial_state: InstanceState,
        defaults: &InstanceDefaults,
        control: Arc<dyn ProcessControl>,
        registry: Arc<ThreadRegistry>,
    ) -> Result<Arc<Self>, InstanceError> {
        if !is_name_valid(name) {
            return Err(InstanceError::MalformedName(name.to_string()));
        }
        let mysqld_compatible = is_mysqld_compatible_name(name);
        let mut instance_options = InstanceOptions::new(name);
        for option in options {
            if mysqld_compatible && is_manager_option(&option.name) {
                return Err(InstanceError::IncompatibleOption(option.name));
            }
            instance_options.set_option(option);
        }
        let configured = match instance_options.complete_initialization(defaults, control.as_ref()) {
            Ok(()) => true,
            Err(e) => {
                warn!("[{name}] misconfigured: {e:#}");
                false
            }
        };
        Ok(Arc::new(Self {
            name: name.to_string(),
            mysqld_compatible,
            defaults: defaults.clone(),
            control,
            registry,
            inner: Mutex::new(InstanceInner {
                options: instance_options,
                state: initial_state,
                crashed: false,
                monitoring_thread_active: false,
                configured,
                restart_counter: 0,
                crash_moment: None,
                last_checked: None,
            }),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_mysqld_compatible(&self) -> bool {
        self.mysqld_compatible
    }

    pub fn lock(self: &Arc<Self>) -> InstanceGuard<'_> {
        InstanceGuard {
            instance: self,
            inner: self.inner.lock(),
        }
    }

    /// Body of the instance monitor thread: runs the server to completion,
    /// then records the exit and tells whoever is interested.
    fn monitor<F>(self: Arc<Self>, argv: Vec<String>, on_exit: F)
    where
        F: FnOnce(),
    {
        match self.control.launch(&argv) {
            Ok(mut process) => {
                info!(
                    "[{}] spawned (pid={}, cmd={})",
                    self.name,
                    process.pid(),
                    argv.first().map_or("", String::as_str)
                );
                match process.wait() {
                    Ok(Some(code)) => info!("[{}] exited with code {code}", self.name),
                    Ok(None) => info!("[{}] terminated by a signal", self.name),
                    Err(e) => warn!("[{}] failed to wait for the server: {e}", self.name),
                }
            }
            Err(e) => error!(
                "[{}] failed to launch {}: {e}",
                self.name,
                argv.first().map_or("", String::as_str)
            ),
        }
        {
            let mut inner = self.inner.lock();
            inner.crashed = true;
            inner.monitoring_thread_active = false;
        }
        on_exit();
    }
}

pub struct InstanceGuard<'a> {
    instance: &'a Arc<Instance>,
    inner: MutexGuard<'a, InstanceInner>,
}

impl Deref for InstanceGuard<'_> {
    type Target = InstanceInner;

    fn deref(&self) -> &InstanceInner {
        &self.inner
    }
}

impl DerefMut for InstanceGuard<'_> {
    fn deref_mut(&mut self) -> &mut InstanceInner {
        &mut self.inner
    }
}

impl InstanceGuard<'_> {
    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub fn is_mysqld_compatible(&self) -> bool {
        self.instance.mysqld_compatible
    }

    pub fn state(&self) -> InstanceState {
        self.inner.state
    }

    pub fn set_state(&mut self, next: InstanceState) {
        let current = self.inner.state;
        if !current.can_transition_to(next) {
            warn!("[{}] unexpected transition {current:?} -> {next:?}", self.name());
        }
        if current != next {
            debug!("[{}] {current} -> {next}", self.name());
        }
        self.inner.state = next;
    }

    pub fn options(&self) -> &InstanceOptions {
        &self.inner.options
    }

    pub fn is_guarded(&self) -> bool {
        self.inner.options.is_guarded()
    }

    pub fn is_configured(&self) -> bool {
        self.inner.configured
    }

    pub fn is_crashed(&self) -> bool {
        self.inner.crashed
    }

    pub fn is_monitoring_thread_active(&self) -> bool {
        self.inner.monitoring_thread_active
    }

    /// Replaces the options and re-derives everything from them.
    pub fn update_options<F>(&mut self, edit: F)
    where
        F: FnOnce(&mut InstanceOptions),
    {
        edit(&mut self.inner.options);
        let instance = self.instance;
        self.inner.configured = match self
            .inner
            .options
            .complete_initialization(&instance.defaults, instance.control.as_ref())
        {
            Ok(()) => true,
            Err(e) => {
                warn!("[{}] misconfigured: {e:#}", instance.name);
                false
            }
        };
    }

    pub fn is_mysqld_running(&self) -> bool {
        self.instance
            .control
            .is_alive(&self.inner.options.endpoint())
    }

    pub fn is_active(&self) -> bool {
        self.inner.monitoring_thread_active
            || (self.is_guarded() && self.inner.state != InstanceState::Stopped)
            || self.is_mysqld_running()
    }

    pub fn reset_stat(&mut self) {
        self.inner.restart_counter = 0;
        self.inner.crash_moment = None;
        self.inner.last_checked = None;
    }

    /// Launches the server on a registered monitor thread. `on_exit` runs on
    /// that thread once the server is gone and its exit has been recorded.
    /// A start that fails here leaves the instance crashed, as if the server
    /// had exited at once.
    pub fn start_mysqld<F>(&mut self, on_exit: F) -> Result<(), InstanceError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.inner.configured {
            self.inner.crashed = true;
            return Err(InstanceError::Misconfigured);
        }
        if let Some(pid_file) = self.inner.options.pid_file() {
            match fs::remove_file(pid_file) {
                Ok(()) => debug!("[{}] removed stale pid file", self.name()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "[{}] cannot remove pid file {}: {e}",
                    self.name(),
                    pid_file.display()
                ),
            }
        }
        self.inner.crashed = false;
        self.inner.monitoring_thread_active = true;

        let instance = Arc::clone(self.instance);
        let argv = self.inner.options.argv().to_vec();
        let thread_name = format!("monitor-{}", self.name());
        let spawned = self
            .instance
            .registry
            .spawn(&thread_name, move |_info| instance.monitor(argv, on_exit));
        if let Err(e) = spawned {
            self.inner.monitoring_thread_active = false;
            self.inner.crashed = true;
            error!("[{}] cannot start monitor thread: {e}", self.name());
            return Err(InstanceError::Spawn(e));
        }
        Ok(())
    }

    /// SIGTERM, wait up to the shutdown delay, then SIGKILL and wait again.
    pub fn stop_mysqld(&mut self) -> Result<(), InstanceError> {
        let delay = self.inner.options.shutdown_delay();
        info!("[{}] stopping (shutdown-delay={}s)", self.name(), delay.as_secs());
        if let Err(e) = self.kill_mysqld(Signal::SIGTERM) {
            debug!("[{}] {e}", self.name());
        }
        if self.wait_for_stop(delay) {
            return Ok(());
        }
        warn!(
            "[{}] still running after {}s, sending SIGKILL",
            self.name(),
            delay.as_secs()
        );
        if let Err(e) = self.kill_mysqld(Signal::SIGKILL) {
            debug!("[{}] {e}", self.name());
        }
        if self.wait_for_stop(delay) {
            return Ok(());
        }
        error!("[{}] could not be stopped", self.name());
        Err(InstanceError::StopFailed)
    }

    fn wait_for_stop(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let pid_file_exists = self
                .inner
                .options
                .pid_file()
                .is_some_and(|p| p.exists());
            if !pid_file_exists && !self.is_mysqld_running() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
    }

    /// Sends `signal` to the pid recorded in the pid file.
    pub fn kill_mysqld(&self, signal: Signal) -> Result<(), InstanceError> {
        let Some(pid) = self.inner.options.load_pid() else {
            warn!("[{}] cannot send {signal}: no pid file", self.name());
            return Err(InstanceError::NoPid);
        };
        info!("[{}] sending {signal} (pid={pid})", self.name());
        self.instance
            .control
            .signal(pid, signal)
            .map_err(|source| InstanceError::Signal {
                signal,
                pid,
                source,
            })?;
        if signal == Signal::SIGKILL
            && let Some(pid_file) = self.inner.options.pid_file()
            && let Err(e) = fs::remove_file(pid_file)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!("[{}] cannot remove pid file: {e}", self.name());
        }
        Ok(())
    }
}
