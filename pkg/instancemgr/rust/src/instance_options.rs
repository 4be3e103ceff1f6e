// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-instance configuration: the options read from the instance's section
//! of the option file, plus everything derived from them (binary location,
//! version, data directory, pid file and the final command line).

use crate::option_file::{NamedOption, same_option};
use crate::process::ProcessControl;
use crate::protocol::client::Endpoint;
use anyhow::{Context, Result};
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SHUTDOWN_DELAY: Duration = Duration::from_secs(35);
pub const DEFAULT_MYSQLD_PORT: u16 = 3306;

/// Options interpreted by the manager itself and never passed to mysqld.
pub const MANAGER_OPTIONS: [&str; 3] = ["nonguarded", "mysqld-path", "shutdown-delay"];

pub fn is_manager_option(name: &str) -> bool {
    MANAGER_OPTIONS.iter().any(|o| same_option(o, name))
}

/// Manager-wide settings every instance falls back on.
#[derive(Debug, Clone)]
pub struct InstanceDefaults {
    pub mysqld_path: PathBuf,
    pub hostname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Error,
    General,
    Slow,
}

impl LogKind {
    pub const ALL: [LogKind; 3] = [LogKind::Error, LogKind::General, LogKind::Slow];

    pub fn label(self) -> &'static str {
        match self {
            LogKind::Error => "ERROR LOG",
            LogKind::General => "GENERAL LOG",
            LogKind::Slow => "SLOW LOG",
        }
    }

    fn option_names(self) -> &'static [&'static str] {
        match self {
            LogKind::Error => &["log-error"],
            LogKind::General => &["log", "general-log-file"],
            LogKind::Slow => &["log-slow-queries", "slow-query-log-file"],
        }
    }

    fn default_file_name(self, hostname: &str) -> String {
        match self {
            LogKind::Error => format!("{hostname}.err"),
            LogKind::General => format!("{hostname}.log"),
            LogKind::Slow => format!("{hostname}-slow.log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLocation {
    Disabled,
    /// Enabled but the location depends on something unknown (no datadir).
    Unresolved,
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct InstanceOptions {
    instance_name: String,
    options: Vec<NamedOption>,
    hostname: String,
    nonguarded: bool,
    shutdown_delay: Duration,
    mysqld_path: Option<PathBuf>,
    mysqld_real_path: Option<PathBuf>,
    mysqld_version: Option<String>,
    datadir: Option<PathBuf>,
    pid_file: Option<PathBuf>,
    argv: Vec<String>,
}

impl InstanceOptions {
    pub fn new(instance_name: &str) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            options: Vec::new(),
            hostname: String::new(),
            nonguarded: false,
            shutdown_delay: DEFAULT_SHUTDOWN_DELAY,
            mysqld_path: None,
            mysqld_real_path: None,
            mysqld_version: None,
            datadir: None,
            pid_file: None,
            argv: Vec::new(),
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Options in file order.
    pub fn options(&self) -> &[NamedOption] {
        &self.options
    }

    pub fn get(&self, name: &str) -> Option<&NamedOption> {
        self.options.iter().find(|o| same_option(&o.name, name))
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|o| o.value.as_deref())
    }

    /// Adds or replaces an option. A later setting wins, as in the file.
    pub fn set_option(&mut self, option: NamedOption) {
        match self.options.iter_mut().find(|o| same_option(&o.name, &option.name)) {
            Some(existing) => existing.value = option.value,
            None => self.options.push(option),
        }
        self.refresh_manager_options();
    }

    pub fn unset_option(&mut self, name: &str) {
        self.options.retain(|o| !same_option(&o.name, name));
        self.refresh_manager_options();
    }

    fn refresh_manager_options(&mut self) {
        self.nonguarded = self.get("nonguarded").is_some();
        self.shutdown_delay = match self.value("shutdown-delay") {
            None => DEFAULT_SHUTDOWN_DELAY,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    warn!(
                        "[{}] invalid shutdown-delay '{raw}', using {}s",
                        self.instance_name,
                        DEFAULT_SHUTDOWN_DELAY.as_secs()
                    );
                    DEFAULT_SHUTDOWN_DELAY
                }
            },
        };
    }

    pub fn is_guarded(&self) -> bool {
        !self.nonguarded
    }

    pub fn shutdown_delay(&self) -> Duration {
        self.shutdown_delay
    }

    pub fn mysqld_path(&self) -> Option<&Path> {
        self.mysqld_path.as_deref()
    }

    pub fn mysqld_version(&self) -> Option<&str> {
        self.mysqld_version.as_deref()
    }

    /// Dotted version number extracted from the version line, e.g. `5.1.73`
    /// from `mysqld  Ver 5.1.73-log for linux-gnu on x86_64`.
    pub fn version_number(&self) -> Option<String> {
        let line = self.mysqld_version.as_deref()?;
        let (_, after) = line.split_once("Ver ")?;
        let number: String = after
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        (!number.is_empty()).then_some(number)
    }

    pub fn datadir(&self) -> Option<&Path> {
        self.datadir.as_deref()
    }

    pub fn pid_file(&self) -> Option<&Path> {
        self.pid_file.as_deref()
    }

    /// Command line used to launch the server.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Where the connect probe should knock.
    pub fn endpoint(&self) -> Endpoint {
        if let Some(socket) = self.value("socket") {
            return Endpoint::Unix(PathBuf::from(socket));
        }
        let port = self
            .value("port")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_MYSQLD_PORT);
        Endpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    /// Resolves everything derived from the raw options. On failure the
    /// derived fields stay cleared and the instance cannot be started.
    pub fn complete_initialization(
        &mut self,
        defaults: &InstanceDefaults,
        control: &dyn ProcessControl,
    ) -> Result<()> {
        self.hostname = defaults.hostname.clone();
        self.mysqld_path = None;
        self.mysqld_real_path = None;
        self.mysqld_version = None;
        self.datadir = None;
        self.pid_file = None;
        self.argv.clear();
        self.refresh_manager_options();

        let mysqld_path = self
            .value("mysqld-path")
            .map(PathBuf::from)
            .unwrap_or_else(|| defaults.mysqld_path.clone());
        self.mysqld_path = Some(mysqld_path.clone());
        let real_path = fs::canonicalize(&mysqld_path)
            .with_context(|| format!("cannot resolve mysqld path {}", mysqld_path.display()))?;
        let version = control.mysqld_version(&real_path)?;
        let datadir = match self.value("datadir") {
            Some(dir) => PathBuf::from(dir),
            None => control.default_datadir(&real_path)?,
        };
        let pid_file = self.resolve_pid_file(&datadir);

        let mut argv = vec![real_path.display().to_string(), "--no-defaults".to_string()];
        if self.get("pid-file").is_none() {
            argv.push(format!("--pid-file={}", pid_file.display()));
        }
        for option in self.options.iter().filter(|o| !is_manager_option(&o.name)) {
            if same_option(&option.name, "pid-file") {
                argv.push(format!("--pid-file={}", pid_file.display()));
                continue;
            }
            argv.push(match &option.value {
                Some(value) => format!("--{}={value}", option.name),
                None => format!("--{}", option.name),
            });
        }

        self.mysqld_real_path = Some(real_path);
        self.mysqld_version = Some(version);
        self.datadir = Some(datadir);
        self.pid_file = Some(pid_file);
        self.argv = argv;
        Ok(())
    }

    fn resolve_pid_file(&self, datadir: &Path) -> PathBuf {
        match self.value("pid-file") {
            Some(path) => datadir.join(path),
            None if self.instance_name == "mysqld" => {
                datadir.join(format!("{}.pid", self.hostname))
            }
            None => datadir.join(format!("{}-{}.pid", self.hostname, self.instance_name)),
        }
    }

    /// Pid recorded in the pid file, if the file exists and parses.
    pub fn load_pid(&self) -> Option<i32> {
        let path = self.pid_file.as_deref()?;
        let text = fs::read_to_string(path).ok()?;
        text.trim().parse().ok().filter(|pid| *pid > 0)
    }

    pub fn log_location(&self, kind: LogKind) -> LogLocation {
        let Some(option) = kind.option_names().iter().find_map(|name| self.get(name)) else {
            return LogLocation::Disabled;
        };
        let file = match option.value.as_deref() {
            Some(v) if !v.is_empty() => PathBuf::from(v),
            _ => PathBuf::from(kind.default_file_name(&self.hostname)),
        };
        if file.is_absolute() {
            return LogLocation::Path(file);
        }
        match &self.datadir {
            Some(datadir) => LogLocation::Path(datadir.join(file)),
            None => LogLocation::Unresolved,
        }
    }
}
