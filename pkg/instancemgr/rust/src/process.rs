// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Everything the manager does to the outside world on behalf of an instance:
//! probing the server, launching and signalling `mysqld`, and asking the
//! binary about itself. `ProcessControl` is the seam tests replace.

use crate::protocol::client::{Endpoint, ProbeOutcome, probe};
use anyhow::{Context, Result, bail};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// How a launched server ended: `Some(code)` for a normal exit, `None` when
/// it was killed by a signal or the status could not be collected.
pub type ExitCode = Option<i32>;

/// A launched server process.
pub trait ServerProcess: Send {
    fn pid(&self) -> u32;
    /// Blocks until the process exits.
    fn wait(&mut self) -> io::Result<ExitCode>;
}

pub trait ProcessControl: Send + Sync {
    /// Whether a server answers at `endpoint`.
    fn is_alive(&self, endpoint: &Endpoint) -> bool;
    fn launch(&self, argv: &[String]) -> io::Result<Box<dyn ServerProcess>>;
    fn signal(&self, pid: i32, signal: Signal) -> io::Result<()>;
    /// Version line printed by `mysqld --version`.
    fn mysqld_version(&self, mysqld_path: &Path) -> Result<String>;
    /// Compiled-in data directory of the server binary.
    fn default_datadir(&self, mysqld_path: &Path) -> Result<PathBuf>;
}

/// The real thing: child processes, signals and network probes.
pub struct SystemControl {
    threads_have_own_pid: bool,
    probe_timeout: Duration,
}

impl SystemControl {
    pub fn new(threads_have_own_pid: bool) -> Self {
        Self {
            threads_have_own_pid,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ProcessControl for SystemControl {
    fn is_alive(&self, endpoint: &Endpoint) -> bool {
        match probe(endpoint, self.probe_timeout) {
            ProbeOutcome::Accepted => {
                warn!("server at {endpoint} accepted the probe account; check its grant tables");
                true
            }
            ProbeOutcome::AccessDenied => true,
            ProbeOutcome::Unreachable => false,
        }
    }

    fn launch(&self, argv: &[String]) -> io::Result<Box<dyn ServerProcess>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()?;
        Ok(Box::new(SystemProcess {
            child,
            threads_have_own_pid: self.threads_have_own_pid,
        }))
    }

    fn signal(&self, pid: i32, sig: Signal) -> io::Result<()> {
        signal::kill(Pid::from_raw(pid), sig)?;
        Ok(())
    }

    fn mysqld_version(&self, mysqld_path: &Path) -> Result<String> {
        let stdout = run_mysqld(mysqld_path, &["--no-defaults", "--version"])?;
        stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .with_context(|| format!("{} printed no version", mysqld_path.display()))
    }

    fn default_datadir(&self, mysqld_path: &Path) -> Result<PathBuf> {
        let stdout = run_mysqld(mysqld_path, &["--no-defaults", "--verbose", "--help"])?;
        parse_datadir(&stdout)
            .with_context(|| format!("{} reported no datadir", mysqld_path.display()))
    }
}

fn run_mysqld(mysqld_path: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(mysqld_path)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .with_context(|| format!("failed to run {}", mysqld_path.display()))?;
    if !output.status.success() {
        bail!(
            "{} {} exited with {}",
            mysqld_path.display(),
            args.join(" "),
            output.status
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Finds the `datadir  <path>` row of the variables table printed by
/// `--verbose --help`.
pub(crate) fn parse_datadir(help: &str) -> Option<PathBuf> {
    help.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("datadir"), Some(path)) => Some(PathBuf::from(path)),
            _ => None,
        }
    })
}

struct SystemProcess {
    child: Child,
    threads_have_own_pid: bool,
}

impl ServerProcess for SystemProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn wait(&mut self) -> io::Result<ExitCode> {
        if !self.threads_have_own_pid {
            return Ok(self.child.wait()?.code());
        }
        // Each thread is a separate process, so the child may belong to a
        // sibling thread as far as the kernel is concerned. Reap whatever
        // exits until ours does.
        let ours = Pid::from_raw(i32::try_from(self.child.id()).unwrap_or(i32::MAX));
        loop {
            match waitpid(None, None) {
                Ok(WaitStatus::Exited(pid, code)) if pid == ours => return Ok(Some(code)),
                Ok(WaitStatus::Signaled(pid, ..)) if pid == ours => return Ok(None),
                Ok(status) => debug!("reaped unrelated child: {status:?}"),
                Err(Errno::EINTR) => {}
                Err(Errno::ECHILD) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Detects thread implementations that give every thread its own process id
/// (LinuxThreads). Checked once at startup.
pub fn threads_have_own_pid() -> bool {
    let parent = std::process::id();
    std::thread::spawn(move || std::process::id() != parent)
        .join()
        .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("mysqld");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    // -- launch tests --

    #[test]
    fn test_launch_and_wait_exit_code() {
        let control = SystemControl::new(false);
        let mut proc = control
            .launch(&["/bin/sh".into(), "-c".into(), "exit 7".into()])
            .unwrap();
        assert!(proc.pid() > 0);
        assert_eq!(proc.wait().unwrap(), Some(7));
    }

    #[test]
    fn test_launch_nonexistent_binary() {
        let control = SystemControl::new(false);
        assert!(control.launch(&["/nonexistent/mysqld".into()]).is_err());
        assert!(control.launch(&[]).is_err());
    }

    #[test]
    fn test_signal_kills_child() {
        let control = SystemControl::new(false);
        let mut proc = control.launch(&["/bin/sleep".into(), "60".into()]).unwrap();
        let pid = i32::try_from(proc.pid()).unwrap();
        control.signal(pid, Signal::SIGKILL).unwrap();
        assert_eq!(proc.wait().unwrap(), None);
    }

    #[test]
    fn test_signal_missing_process_fails() {
        let control = SystemControl::new(false);
        let mut proc = control.launch(&["/bin/sh".into(), "-c".into(), "exit 0".into()]).unwrap();
        let pid = i32::try_from(proc.pid()).unwrap();
        proc.wait().unwrap();
        assert!(control.signal(pid, Signal::SIGTERM).is_err());
    }

    // -- introspection tests --

    #[test]
    fn test_mysqld_version() {
        let dir = tempfile::tempdir().unwrap();
        let mysqld = script(dir.path(), "echo '/usr/sbin/mysqld  Ver 5.1.73 for redhat-linux-gnu on x86_64'");
        let control = SystemControl::new(false);
        assert_eq!(
            control.mysqld_version(&mysqld).unwrap(),
            "/usr/sbin/mysqld  Ver 5.1.73 for redhat-linux-gnu on x86_64"
        );
    }

    #[test]
    fn test_mysqld_version_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mysqld = script(dir.path(), "exit 1");
        let control = SystemControl::new(false);
        assert!(control.mysqld_version(&mysqld).is_err());
    }

    #[test]
    fn test_default_datadir() {
        let dir = tempfile::tempdir().unwrap();
        let mysqld = script(
            dir.path(),
            "cat <<EOF\nVariables (--variable-name=value)\ndatadir                           /var/lib/mysql/\ndefault-character-set             latin1\nEOF",
        );
        let control = SystemControl::new(false);
        assert_eq!(
            control.default_datadir(&mysqld).unwrap(),
            PathBuf::from("/var/lib/mysql/")
        );
    }

    #[test]
    fn test_parse_datadir_ignores_similar_names() {
        assert_eq!(parse_datadir("datadir-extra  /x\n"), None);
        assert_eq!(parse_datadir("  datadir /d\n"), Some(PathBuf::from("/d")));
    }

    #[test]
    fn test_threads_share_pid() {
        // NPTL on every platform this runs on
        assert!(!threads_have_own_pid());
    }
}
