// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Watchdog parent used with `--run-as-service`. The angel detaches from the
//! terminal, runs the manager as a child process (the same binary, marked by
//! an environment variable) and starts it again if it dies from a signal.

use crate::options::Options;
use crate::pid_file::PidFile;
use anyhow::{Context, Result};
use log::{error, info, warn};
use nix::sys::signal::{self, SigSet, Signal};
use nix::unistd::{Pid, daemon};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus};
use std::time::Duration;

/// Set in the environment of the manager process the angel spawns.
pub const ANGEL_CHILD_ENV: &str = "MYSQLMANAGER_ANGEL_CHILD";
const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// Whether this process is the manager started by an angel.
pub fn is_angel_child() -> bool {
    std::env::var_os(ANGEL_CHILD_ENV).is_some()
}

#[derive(Debug, PartialEq, Eq)]
enum Next {
    Exit(i32),
    Respawn,
}

/// A manager that exited on its own passes its code on; one killed by a
/// signal is restarted unless the angel itself was told to stop.
fn next_step(status: ExitStatus, terminating: bool) -> Next {
    match (status.code(), status.signal()) {
        (Some(code), _) => Next::Exit(code),
        (None, Some(_)) if !terminating => Next::Respawn,
        _ => Next::Exit(1),
    }
}

/// Runs the angel until the manager exits for good. Returns the exit code
/// for the angel process.
pub fn run(options: &Options) -> Result<i32> {
    daemon(true, true).context("cannot detach from the terminal")?;
    let _pid_file = PidFile::create(&options.angel_pid_file)?;

    let mut signals = SigSet::empty();
    for signal in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP, Signal::SIGCHLD] {
        signals.add(signal);
    }
    signals
        .thread_block()
        .context("cannot block angel signals")?;

    let mut terminating = false;
    loop {
        let mut child = spawn_manager()?;
        info!("angel: manager spawned (pid={})", child.id());
        let status = supervise(&signals, &mut child, &mut terminating)?;
        match next_step(status, terminating) {
            Next::Exit(code) => {
                info!("angel: manager exited with code {code}");
                return Ok(code);
            }
            Next::Respawn => {
                warn!(
                    "angel: manager killed by signal {}, restarting in {}s",
                    status.signal().unwrap_or_default(),
                    RESPAWN_DELAY.as_secs()
                );
                std::thread::sleep(RESPAWN_DELAY);
            }
        }
    }
}

fn spawn_manager() -> Result<Child> {
    let exe = std::env::current_exe().context("cannot locate the manager binary")?;
    Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .env(ANGEL_CHILD_ENV, "1")
        .spawn()
        .with_context(|| format!("cannot spawn {}", exe.display()))
}

/// Forwards termination signals to the manager until it exits.
fn supervise(signals: &SigSet, child: &mut Child, terminating: &mut bool) -> Result<ExitStatus> {
    let pid = Pid::from_raw(i32::try_from(child.id()).context("child pid out of range")?);
    loop {
        if let Some(status) = child.try_wait().context("cannot wait for the manager")? {
            return Ok(status);
        }
        let received = signals.wait().context("sigwait failed")?;
        if received == Signal::SIGCHLD {
            continue;
        }
        if received != Signal::SIGHUP {
            *terminating = true;
        }
        info!("angel: forwarding {received} to the manager");
        if let Err(e) = signal::kill(pid, received) {
            error!("angel: cannot signal the manager: {e}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // raw wait statuses: exit code in the second byte, signal in the low bits
    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    fn killed(signal: Signal) -> ExitStatus {
        ExitStatus::from_raw(signal as i32)
    }

    #[test]
    fn test_exit_code_is_propagated() {
        assert_eq!(next_step(exited(0), false), Next::Exit(0));
        assert_eq!(next_step(exited(1), false), Next::Exit(1));
        assert_eq!(next_step(exited(0), true), Next::Exit(0));
    }

    #[test]
    fn test_signal_death_respawns_unless_stopping() {
        assert_eq!(next_step(killed(Signal::SIGSEGV), false), Next::Respawn);
        assert_eq!(next_step(killed(Signal::SIGKILL), false), Next::Respawn);
        assert_eq!(next_step(killed(Signal::SIGKILL), true), Next::Exit(1));
    }
}
