// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Manager configuration: command line, with defaults taken from the
//! `[manager]` section of the option file.

use crate::listener::{DEFAULT_PORT, DEFAULT_SOCKET};
use crate::option_file::{self, OptionFileError};
use anyhow::Result;
use clap::{CommandFactory, Parser};
use log::{LevelFilter, warn};
use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Overrides the default location of the option file.
pub const DEFAULTS_FILE_ENV: &str = "MYSQLMANAGER_DEFAULTS_FILE";
const DEFAULT_DEFAULTS_FILE: &str = "/etc/my.cnf";
const MANAGER_SECTION: &str = "manager";

/// Supervisor for database server instances
#[derive(Parser, Debug, Clone)]
#[command(name = "mysqlmanager", version)]
#[command(args_override_self = true)]
pub struct Options {
    /// Option file with the instance sections and the [manager] section
    #[arg(long, env = DEFAULTS_FILE_ENV, default_value = DEFAULT_DEFAULTS_FILE)]
    pub defaults_file: PathBuf,

    /// TCP port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind the TCP socket to (all interfaces by default)
    #[arg(long)]
    pub bind_address: Option<IpAddr>,

    /// Unix domain socket to listen on
    #[arg(long, default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    #[arg(long, default_value = "/tmp/mysqlmanager.pid")]
    pub pid_file: PathBuf,

    /// Pid file of the angel process (with --run-as-service)
    #[arg(long, default_value = "/tmp/mysqlmanager.angel.pid")]
    pub angel_pid_file: PathBuf,

    /// Accounts allowed to connect, one `user:*<hash>` per line
    #[arg(long, default_value = "/etc/mysqlmanager.passwd")]
    pub password_file: PathBuf,

    /// Server binary used by instances without a mysqld-path option
    #[arg(long, default_value = "/usr/sbin/mysqld")]
    pub default_mysqld_path: PathBuf,

    /// Seconds between guardian sweeps
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u64).range(1..))]
    pub monitoring_interval: u64,

    /// Manage a default `mysqld` instance even if the option file lacks one
    #[arg(long)]
    pub mysqld_safe_compatible: bool,

    /// Daemonize and keep the manager alive under an angel process
    #[arg(long)]
    pub run_as_service: bool,

    /// Seconds an idle client connection is kept open
    #[arg(long, default_value_t = 28800, value_parser = clap::value_parser!(u64).range(1..))]
    pub wait_timeout: u64,

    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

impl Options {
    /// Parses `args` (program name first). Options found in the `[manager]`
    /// section of the option file are applied first, so the command line
    /// overrides them. A missing option file leaves the built-in defaults.
    pub fn load<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let first_pass = Self::try_parse_from(&args)?;
        let from_file = manager_section_args(&first_pass.defaults_file)?;
        if from_file.is_empty() {
            return Ok(first_pass);
        }

        let mut merged = Vec::with_capacity(args.len() + from_file.len());
        merged.extend(args.first().cloned());
        merged.extend(from_file.into_iter().map(OsString::from));
        merged.extend(args.into_iter().skip(1));
        Ok(Self::try_parse_from(merged)?)
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout)
    }
}

/// `[manager]` options turned into command-line arguments. Keys that are not
/// manager options are reported and dropped.
fn manager_section_args(path: &std::path::Path) -> Result<Vec<String>> {
    let sections = match option_file::read_sections(path) {
        Ok(sections) => sections,
        Err(OptionFileError::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let command = Options::command();
    let known: Vec<&str> = command
        .get_arguments()
        .filter_map(|a| a.get_long())
        .filter(|long| *long != "defaults-file")
        .collect();

    let mut args = Vec::new();
    for section in sections.iter().filter(|s| s.name == MANAGER_SECTION) {
        for option in &section.options {
            let Some(long) = known
                .iter()
                .find(|long| option_file::same_option(long, &option.name))
            else {
                warn!(
                    "{}: unknown option '{}' in [{MANAGER_SECTION}]",
                    path.display(),
                    option.name
                );
                continue;
            };
            args.push(match &option.value {
                Some(value) => format!("--{long}={value}"),
                None => format!("--{long}"),
            });
        }
    }
    Ok(args)
}
