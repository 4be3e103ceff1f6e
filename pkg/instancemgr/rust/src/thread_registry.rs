// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Registry of worker threads and coordinator of their shutdown.
//!
//! Every long-lived worker (guardian, listener, instance monitors, client
//! connections) registers here. Shutdown is cooperative: `deliver_shutdown`
//! raises a flag, runs each thread's interrupt hook, wakes whatever condition
//! variable the thread is parked on, and then waits (bounded) for the registry
//! to drain. A worker observes shutdown either through `is_shutdown()` or
//! through the `WaitOutcome` returned by the registry's wait wrappers.

use log::{debug, info, warn};
use nix::sys::pthread::{Pthread, pthread_kill};
use nix::sys::signal::Signal;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Bound on each of the two waits `deliver_shutdown` performs.
pub const SHUTDOWN_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

type InterruptHook = Box<dyn Fn() + Send + Sync>;

struct Slot {
    id: u64,
    name: String,
    current_cond: Option<Arc<Condvar>>,
    interrupt: Option<InterruptHook>,
}

impl Slot {
    fn interrupt(&self) {
        if let Some(hook) = &self.interrupt {
            hook();
        }
        if let Some(cond) = &self.current_cond {
            cond.notify_all();
        }
    }
}

#[derive(Default)]
struct RegistryState {
    threads: Vec<Slot>,
    next_id: u64,
    shutdown: bool,
    shutdown_requested: bool,
    handles: Vec<(String, JoinHandle<()>)>,
}

/// How a registry-mediated wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Notified,
    TimedOut,
    Shutdown,
}

pub struct ThreadRegistry {
    state: Mutex<RegistryState>,
    is_empty: Condvar,
    sigwait_thread: Mutex<Option<Pthread>>,
}

/// Registration handle. Dropping it unregisters the thread, so a worker that
/// returns or unwinds always leaves the registry.
pub struct ThreadInfo {
    id: u64,
    registry: Arc<ThreadRegistry>,
}

impl ThreadInfo {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Explicit form of dropping the handle.
    pub fn unregister(self) {}
}

impl Drop for ThreadInfo {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

impl ThreadRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState::default()),
            is_empty: Condvar::new(),
            sigwait_thread: Mutex::new(None),
        })
    }

    /// Designates the thread that owns the top-level signal wait loop.
    /// `request_shutdown` wakes it with SIGTERM.
    pub fn set_sigwait_thread(&self, thread: Pthread) {
        *self.sigwait_thread.lock() = Some(thread);
    }

    pub fn register_thread(self: &Arc<Self>, name: &str) -> ThreadInfo {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.threads.push(Slot {
            id,
            name: name.to_string(),
            current_cond: None,
            interrupt: None,
        });
        debug!("registered thread '{name}' (id={id})");
        ThreadInfo {
            id,
            registry: Arc::clone(self),
        }
    }

    fn unregister(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(pos) = state.threads.iter().position(|s| s.id == id) {
            let slot = state.threads.remove(pos);
            debug!("unregistered thread '{}' (id={id})", slot.name);
        }
        if state.threads.is_empty() {
            self.is_empty.notify_all();
        }
    }

    /// Installs the hook run when shutdown is delivered to this thread. If
    /// shutdown is already under way the hook runs immediately.
    pub fn set_interrupt<F>(&self, info: &ThreadInfo, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        if state.shutdown {
            drop(state);
            hook();
            return;
        }
        if let Some(slot) = state.threads.iter_mut().find(|s| s.id == info.id) {
            slot.interrupt = Some(Box::new(hook));
        }
    }

    /// Waits on `cond` until notified. Returns `Shutdown` without waiting when
    /// shutdown is already in progress.
    pub fn cond_wait<T>(
        &self,
        info: &ThreadInfo,
        cond: &Arc<Condvar>,
        guard: &mut MutexGuard<'_, T>,
    ) -> WaitOutcome {
        if !self.begin_wait(info, cond) {
            return WaitOutcome::Shutdown;
        }
        cond.wait(guard);
        self.end_wait(info)
    }

    /// Like [`cond_wait`](Self::cond_wait) but gives up at `deadline`.
    pub fn cond_timedwait<T>(
        &self,
        info: &ThreadInfo,
        cond: &Arc<Condvar>,
        guard: &mut MutexGuard<'_, T>,
        deadline: Instant,
    ) -> WaitOutcome {
        if !self.begin_wait(info, cond) {
            return WaitOutcome::Shutdown;
        }
        let timed_out = cond.wait_until(guard, deadline).timed_out();
        match self.end_wait(info) {
            WaitOutcome::Shutdown => WaitOutcome::Shutdown,
            _ if timed_out => WaitOutcome::TimedOut,
            outcome => outcome,
        }
    }

    fn begin_wait(&self, info: &ThreadInfo, cond: &Arc<Condvar>) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        if let Some(slot) = state.threads.iter_mut().find(|s| s.id == info.id) {
            slot.current_cond = Some(Arc::clone(cond));
        }
        true
    }

    fn end_wait(&self, info: &ThreadInfo) -> WaitOutcome {
        let mut state = self.state.lock();
        if let Some(slot) = state.threads.iter_mut().find(|s| s.id == info.id) {
            slot.current_cond = None;
        }
        if state.shutdown {
            WaitOutcome::Shutdown
        } else {
            WaitOutcome::Notified
        }
    }

    /// Raises the shutdown flag and interrupts every registered thread, then
    /// waits for the registry to drain. A thread may have checked the flag
    /// just before it was raised and parked afterwards, so the interrupt is
    /// delivered a second time before giving up.
    pub fn deliver_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        info!(
            "delivering shutdown to {} registered thread(s)",
            state.threads.len()
        );

        for attempt in 1..=2 {
            if state.threads.is_empty() {
                break;
            }
            debug!("shutdown delivery #{attempt}");
            for slot in &state.threads {
                slot.interrupt();
            }
            let deadline = Instant::now() + SHUTDOWN_WAIT_TIMEOUT;
            while !state.threads.is_empty() {
                if self.is_empty.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }

        if !state.threads.is_empty() {
            let names: Vec<&str> = state.threads.iter().map(|s| s.name.as_str()).collect();
            warn!(
                "{} thread(s) did not stop in time: {}",
                names.len(),
                names.join(", ")
            );
        }
    }

    /// Asks the signal-handling thread to begin the process-wide shutdown.
    /// Without a designated thread the request is only recorded.
    pub fn request_shutdown(&self) {
        self.state.lock().shutdown_requested = true;
        match *self.sigwait_thread.lock() {
            Some(thread) => {
                if let Err(e) = pthread_kill(thread, Signal::SIGTERM) {
                    warn!("failed to wake the signal thread: {e}");
                }
            }
            None => debug!("shutdown requested without a signal thread"),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.state.lock().shutdown_requested
    }

    pub fn thread_count(&self) -> usize {
        self.state.lock().threads.len()
    }

    /// Registers a worker and starts it on its own OS thread. The join handle
    /// is kept until `reap`. No new worker starts once shutdown was delivered.
    pub fn spawn<F>(self: &Arc<Self>, name: &str, f: F) -> io::Result<()>
    where
        F: FnOnce(ThreadInfo) + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(io::Error::other(format!(
                "cannot start '{name}': shutting down"
            )));
        }
        let info = self.register_thread(name);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(info))?;

        let finished = {
            let mut state = self.state.lock();
            let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut state.handles)
                .into_iter()
                .partition(|(_, h)| h.is_finished());
            state.handles = running;
            state.handles.push((name.to_string(), handle));
            finished
        };
        join_all(finished);
        Ok(())
    }

    /// Joins every worker that has finished. Workers still running at this
    /// point are reported and left to die with the process.
    pub fn reap(&self) {
        let handles = std::mem::take(&mut self.state.lock().handles);
        let (finished, running): (Vec<_>, Vec<_>) =
            handles.into_iter().partition(|(_, h)| h.is_finished());
        join_all(finished);
        for (name, _) in running {
            warn!("thread '{name}' is still running at exit");
        }
    }
}

fn join_all(handles: Vec<(String, JoinHandle<()>)>) {
    for (name, handle) in handles {
        if handle.join().is_err() {
            warn!("thread '{name}' panicked");
        }
    }
}
