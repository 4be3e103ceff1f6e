// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process-level wiring: builds the shared state, starts the guardian and
//! the listener, then turns termination signals into an ordered shutdown.
//! Instances are stopped first; only then are the listener and the client
//! connections interrupted.

use crate::context::Context as ManagerContext;
use crate::guardian::Guardian;
use crate::instance_map::{InstanceMap, MapSettings};
use crate::instance_options::InstanceDefaults;
use crate::listener::Listener;
use crate::options::Options;
use crate::pid_file::PidFile;
use crate::process::{SystemControl, threads_have_own_pid};
use crate::thread_registry::ThreadRegistry;
use crate::user_map::UserMap;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use nix::sys::pthread::pthread_self;
use nix::sys::signal::{SigSet, Signal};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

pub struct Manager {
    registry: Arc<ThreadRegistry>,
    guardian: Arc<Guardian>,
    signals: SigSet,
    _pid_file: PidFile,
}

impl Manager {
    /// Everything that can fail at startup happens here, before any worker
    /// thread exists.
    pub fn init(options: &Options) -> Result<Self> {
        // workers inherit the mask, so only the calling thread sees these
        let mut signals = SigSet::empty();
        for signal in [Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP] {
            signals.add(signal);
        }
        signals
            .thread_block()
            .context("cannot block termination signals")?;

        let pid_file = PidFile::create(&options.pid_file)?;
        let users = UserMap::load(&options.password_file)?;
        if users.is_empty() {
            warn!("{} lists no users; nobody can log in", options.password_file.display());
        }

        let own_pid = threads_have_own_pid();
        debug!("threads have their own pid: {own_pid}");
        let hostname = hostname::get()
            .context("cannot determine the host name")?
            .to_string_lossy()
            .into_owned();
        let settings = MapSettings {
            defaults_file: options.defaults_file.clone(),
            defaults: InstanceDefaults {
                mysqld_path: options.default_mysqld_path.clone(),
                hostname,
            },
            mysqld_safe_compatible: options.mysqld_safe_compatible,
        };

        let registry = ThreadRegistry::new();
        registry.set_sigwait_thread(pthread_self());
        let map = Arc::new(InstanceMap::new(
            settings,
            Arc::new(SystemControl::new(own_pid)),
            Arc::clone(&registry),
        ));
        map.lock()
            .load()
            .with_context(|| format!("cannot load instances from {}", options.defaults_file.display()))?;
        info!("loaded {} instance(s)", map.lock().len());

        let address = options
            .bind_address
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let listener = Listener::bind(
            Some(SocketAddr::new(address, options.port)),
            Some(&options.socket),
        )?;

        let guardian = Arc::new(Guardian::new(
            Arc::clone(&map),
            Arc::clone(&registry),
            options.monitoring_interval(),
        ));
        let ctx = Arc::new(ManagerContext::new(
            map,
            Arc::clone(&guardian),
            Arc::clone(&registry),
            users,
            options.wait_timeout(),
        ));

        guardian.start().context("cannot start the guardian")?;
        listener.start(ctx).context("cannot start the listener")?;

        Ok(Self {
            registry,
            guardian,
            signals,
            _pid_file: pid_file,
        })
    }

    /// Blocks until shutdown completes. The first SIGTERM or SIGINT asks the
    /// guardian to stop the instances; the guardian signals back once they
    /// are all down.
    pub fn run(self) -> Result<()> {
        loop {
            let signal = self.signals.wait().context("sigwait failed")?;
            if self.guardian.is_stopped() {
                break;
            }
            match signal {
                Signal::SIGHUP => info!("received SIGHUP, ignored"),
                _ if self.guardian.is_shutdown_requested() => {
                    debug!("received {signal} while shutting down");
                }
                _ => {
                    info!("received {signal}, shutting down");
                    self.guardian.request_shutdown();
                }
            }
        }
        info!("instances stopped, closing connections");
        self.registry.deliver_shutdown();
        self.registry.reap();
        info!("manager stopped");
        Ok(())
    }
}
