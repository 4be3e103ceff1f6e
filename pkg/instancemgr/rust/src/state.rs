// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

/// Supervision state of a guarded instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Not running and not to be started.
    Stopped,
    /// Should be running; the guardian starts it on its next pass.
    NotStarted,
    /// Launched, waiting for the server to come up.
    Starting,
    /// Server answers the probe.
    Started,
    /// Died recently; restarted immediately while the crash is fresh.
    JustCrashed,
    /// Died; restarted at most once per monitoring interval.
    Crashed,
    /// Gave up after too many restarts.
    CrashedAndAbandoned,
    /// Asked to terminate, waiting for it to go away.
    Stopping,
}

impl InstanceState {
    pub(crate) fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (_, NotStarted)
                | (NotStarted, Starting)
                | (Starting, JustCrashed)
                | (Started, JustCrashed)
                | (JustCrashed, Crashed)
                | (Crashed, CrashedAndAbandoned)
                | (
                    NotStarted | Starting | JustCrashed | Crashed | CrashedAndAbandoned,
                    Started
                )
                | (
                    NotStarted | Starting | Started | JustCrashed | Crashed | CrashedAndAbandoned,
                    Stopping
                )
                | (_, Stopped)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Stopped => write!(f, "offline"),
            InstanceState::NotStarted => write!(f, "not started"),
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Started => write!(f, "online"),
            InstanceState::JustCrashed => write!(f, "failed"),
            InstanceState::Crashed => write!(f, "crashed"),
            InstanceState::CrashedAndAbandoned => write!(f, "abandoned"),
            InstanceState::Stopping => write!(f, "stopping"),
        }
    }
}
