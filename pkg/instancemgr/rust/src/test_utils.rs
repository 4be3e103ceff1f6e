// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use crate::context::Context;
use crate::guardian::Guardian;
use crate::instance::{Instance, InstanceError};
use crate::instance_map::{InstanceMap, MapSettings};
use crate::instance_options::InstanceDefaults;
use crate::option_file::NamedOption;
use crate::process::{ExitCode, ProcessControl, ServerProcess};
use crate::protocol::client::Endpoint;
use crate::state::InstanceState;
use crate::thread_registry::ThreadRegistry;
use crate::user_map::UserMap;
use nix::sys::signal::Signal;
use parking_lot::{Condvar, Mutex};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub(crate) const TEST_HOSTNAME: &str = "testhost";

struct FakeState {
    alive: bool,
    fail_launches: bool,
    ignore_signals: bool,
    launches: usize,
    generation: u64,
    signals: Vec<(i32, Signal)>,
    remove_on_term: Vec<PathBuf>,
    datadir: PathBuf,
}

struct Shared {
    state: Mutex<FakeState>,
    exited: Condvar,
}

/// In-memory stand-in for the process layer. The "server" is a flag the test
/// flips; launched processes block until `exit_all` or a terminating signal.
pub(crate) struct FakeControl {
    shared: Arc<Shared>,
}

impl FakeControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(FakeState {
                    alive: false,
                    fail_launches: false,
                    ignore_signals: false,
                    launches: 0,
                    generation: 0,
                    signals: Vec::new(),
                    remove_on_term: Vec::new(),
                    datadir: PathBuf::from("/tmp"),
                }),
                exited: Condvar::new(),
            }),
        })
    }

    pub fn set_alive(&self, alive: bool) {
        self.shared.state.lock().alive = alive;
    }

    pub fn is_up(&self) -> bool {
        self.shared.state.lock().alive
    }

    pub fn fail_launches(&self, fail: bool) {
        self.shared.state.lock().fail_launches = fail;
    }

    pub fn ignore_signals(&self, ignore: bool) {
        self.shared.state.lock().ignore_signals = ignore;
    }

    /// File removed when the fake server dies from a signal.
    pub fn remove_on_term(&self, path: PathBuf) {
        self.shared.state.lock().remove_on_term.push(path);
    }

    pub fn set_datadir(&self, datadir: &Path) {
        self.shared.state.lock().datadir = datadir.to_path_buf();
    }

    pub fn launches(&self) -> usize {
        self.shared.state.lock().launches
    }

    pub fn signals(&self) -> Vec<(i32, Signal)> {
        self.shared.state.lock().signals.clone()
    }

    /// Makes every launched process exit.
    pub fn exit_all(&self) {
        self.shared.state.lock().generation += 1;
        self.shared.exited.notify_all();
    }
}

struct FakeProcess {
    shared: Arc<Shared>,
    generation: u64,
    pid: u32,
}

impl ServerProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn wait(&mut self) -> io::Result<ExitCode> {
        let mut state = self.shared.state.lock();
        while state.generation == self.generation {
            self.shared.exited.wait(&mut state);
        }
        Ok(Some(0))
    }
}

impl ProcessControl for FakeControl {
    fn is_alive(&self, _endpoint: &Endpoint) -> bool {
        self.is_up()
    }

    fn launch(&self, argv: &[String]) -> io::Result<Box<dyn ServerProcess>> {
        let mut state = self.shared.state.lock();
        state.launches += 1;
        if state.fail_launches {
            return Err(io::Error::other(format!(
                "cannot exec {}",
                argv.first().map_or("", String::as_str)
            )));
        }
        Ok(Box::new(FakeProcess {
            shared: Arc::clone(&self.shared),
            generation: state.generation,
            pid: 10_000 + state.launches as u32,
        }))
    }

    fn signal(&self, pid: i32, signal: Signal) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.signals.push((pid, signal));
        if !state.ignore_signals && matches!(signal, Signal::SIGTERM | Signal::SIGKILL) {
            state.alive = false;
            for path in &state.remove_on_term {
                let _ = fs::remove_file(path);
            }
            state.generation += 1;
            self.shared.exited.notify_all();
        }
        Ok(())
    }

    fn mysqld_version(&self, _mysqld_path: &Path) -> anyhow::Result<String> {
        Ok("fake-mysqld  Ver 5.1.99 for test".to_string())
    }

    fn default_datadir(&self, _mysqld_path: &Path) -> anyhow::Result<PathBuf> {
        Ok(self.shared.state.lock().datadir.clone())
    }
}

/// Defaults pointing at an existing (empty) `mysqld` file in a fresh
/// directory.
pub(crate) fn fake_defaults() -> (TempDir, InstanceDefaults) {
    let dir = tempfile::tempdir().unwrap();
    let mysqld = dir.path().join("mysqld");
    fs::write(&mysqld, "").unwrap();
    let defaults = InstanceDefaults {
        mysqld_path: mysqld,
        hostname: TEST_HOSTNAME.to_string(),
    };
    (dir, defaults)
}

pub(crate) fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// A scratch directory (doubling as the servers' data directory), a fake
/// process layer and a registry.
pub(crate) struct TestEnv {
    pub dir: TempDir,
    pub defaults: InstanceDefaults,
    pub control: Arc<FakeControl>,
    pub registry: Arc<ThreadRegistry>,
}

impl TestEnv {
    pub fn new() -> Self {
        let (dir, defaults) = fake_defaults();
        let control = FakeControl::new();
        control.set_datadir(dir.path());
        Self {
            dir,
            defaults,
            control,
            registry: ThreadRegistry::new(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn instance(
        &self,
        name: &str,
        options: Vec<NamedOption>,
        state: InstanceState,
    ) -> Result<Arc<Instance>, InstanceError> {
        Instance::new(
            name,
            options,
            state,
            &self.defaults,
            self.control.clone(),
            Arc::clone(&self.registry),
        )
    }

    pub fn config_path(&self) -> PathBuf {
        self.path("my.cnf")
    }

    pub fn write_config(&self, text: &str) -> PathBuf {
        let path = self.config_path();
        fs::write(&path, text).unwrap();
        path
    }

    pub fn settings(&self, mysqld_safe_compatible: bool) -> MapSettings {
        MapSettings {
            defaults_file: self.config_path(),
            defaults: self.defaults.clone(),
            mysqld_safe_compatible,
        }
    }

    /// Writes `config` and loads it into a new map.
    pub fn loaded_map(&self, config: &str) -> Arc<InstanceMap> {
        self.write_config(config);
        let map = Arc::new(InstanceMap::new(
            self.settings(false),
            self.control.clone(),
            Arc::clone(&self.registry),
        ));
        map.lock().load().unwrap();
        map
    }

    pub fn guardian(&self, map: &Arc<InstanceMap>, interval: Duration) -> Arc<Guardian> {
        Arc::new(Guardian::new(Arc::clone(map), Arc::clone(&self.registry), interval))
    }

    /// A context over a freshly loaded map. The guardian is not running; its
    /// interval is long enough that only pings would wake it.
    pub fn context(&self, config: &str, users: UserMap) -> Context {
        let map = self.loaded_map(config);
        let guardian = self.guardian(&map, Duration::from_secs(3600));
        Context::new(
            map,
            guardian,
            Arc::clone(&self.registry),
            users,
            Duration::from_secs(60),
        )
    }

    /// Pid file of `instance` with `pid` written into it.
    pub fn write_pid(&self, instance: &Arc<Instance>, pid: i32) -> PathBuf {
        let path = instance.lock().options().pid_file().unwrap().to_path_buf();
        fs::write(&path, pid.to_string()).unwrap();
        path
    }
}
