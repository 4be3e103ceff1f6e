// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Accept loop over the TCP and Unix domain listening sockets. Every accepted
//! client gets its own registered thread.

use crate::connection;
use crate::context::Context;
use crate::protocol::Vio;
use crate::thread_registry::ThreadInfo;
use anyhow::{Context as _, Result};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsFd;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_PORT: u16 = 2273;
pub const DEFAULT_SOCKET: &str = "/tmp/mysqlmanager.sock";

/// Upper bound on how long the accept loop goes without looking at the
/// shutdown flag.
const POLL_TIMEOUT_MS: u16 = 100;

pub struct Listener {
    tcp: Option<TcpListener>,
    unix: Option<(UnixListener, PathBuf)>,
}

impl Listener {
    /// Binds both sockets up front. A stale socket file left by a previous
    /// run is replaced.
    pub fn bind(tcp: Option<SocketAddr>, socket: Option<&Path>) -> Result<Self> {
        if tcp.is_none() && socket.is_none() {
            anyhow::bail!("no listening socket configured");
        }
        let tcp = tcp.map(bind_tcp).transpose()?;
        let unix = match socket {
            Some(path) => Some((bind_unix(path)?, path.to_path_buf())),
            None => None,
        };
        Ok(Self { tcp, unix })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn start(self, ctx: Arc<Context>) -> io::Result<()> {
        let registry = Arc::clone(&ctx.registry);
        registry.spawn("listener", move |info| self.run(ctx, info))
    }

    fn run(self, ctx: Arc<Context>, info: ThreadInfo) {
        info!("listener started");
        while !ctx.registry.is_shutdown() {
            let (tcp_ready, unix_ready) = match self.wait_readable() {
                Ok(ready) => ready,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("listener: poll failed: {e}");
                    break;
                }
            };
            if tcp_ready && let Some(listener) = &self.tcp {
                match listener.accept() {
                    Ok((stream, _)) => dispatch(&ctx, Vio::Tcp(stream)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => warn!("listener: accept failed: {e}"),
                }
            }
            if unix_ready && let Some((listener, _)) = &self.unix {
                match listener.accept() {
                    Ok((stream, _)) => dispatch(&ctx, Vio::Unix(stream)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => warn!("listener: accept failed: {e}"),
                }
            }
        }
        if let Some((_, path)) = &self.unix
            && let Err(e) = fs::remove_file(path)
        {
            warn!("cannot remove {}: {e}", path.display());
        }
        info!("listener stopped");
        drop(info);
    }

    /// Polls the sockets for at most `POLL_TIMEOUT_MS`.
    fn wait_readable(&self) -> Result<(bool, bool), Errno> {
        let mut fds = Vec::with_capacity(2);
        if let Some(listener) = &self.tcp {
            fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
        }
        if let Some((listener, _)) = &self.unix {
            fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
        }
        if poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS))? == 0 {
            return Ok((false, false));
        }
        let readable = |fd: &PollFd<'_>| {
            fd.revents()
                .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLERR))
        };
        let mut ready = fds.iter().map(readable);
        let tcp_ready = self.tcp.is_some() && ready.next().unwrap_or(false);
        let unix_ready = self.unix.is_some() && ready.next().unwrap_or(false);
        Ok((tcp_ready, unix_ready))
    }
}

fn bind_tcp(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).with_context(|| format!("cannot bind to {addr}"))?;
    listener.set_nonblocking(true)?;
    info!("listening on {}", listener.local_addr()?);
    Ok(listener)
}

fn bind_unix(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        debug!("removing stale socket {}", path.display());
        fs::remove_file(path).with_context(|| format!("cannot remove {}", path.display()))?;
    }
    let listener =
        UnixListener::bind(path).with_context(|| format!("cannot bind to {}", path.display()))?;
    listener.set_nonblocking(true)?;
    info!("listening on {}", path.display());
    Ok(listener)
}

fn dispatch(ctx: &Arc<Context>, vio: Vio) {
    // accepted sockets must block; reads rely on the idle timeout instead
    if let Err(e) = vio.set_nonblocking(false) {
        warn!("listener: {e}");
        return;
    }
    let worker = Arc::clone(ctx);
    if let Err(e) = ctx
        .registry
        .spawn("connection", move |info| connection::serve(worker, vio, info))
    {
        error!("listener: cannot start a connection thread: {e}");
    }
}
