use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::compiler::{EntryPoint, Program};
use crate::config::RunConfig;
use crate::permission::PermissionSet;
use crate::vm::{Completion, Interpreter, Limits};
use crate::{sandbox, Result, SkiffError};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Cooperative cancellation shared between a worker and its supervisor
///
/// Once tripped it stays tripped. The interpreter polls it at every
/// statement, call and output write, and sleeping workers are woken.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    inner: Arc<KillInner>,
}

#[derive(Debug, Default)]
struct KillInner {
    killed: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.inner.killed.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless killed first; returns whether it was killed
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut guard = self.inner.lock.lock();
        while !self.is_killed() {
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.inner.wake.wait_for(&mut guard, deadline - now);
                }
                None => self.inner.wake.wait(&mut guard),
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Thread spawned, not yet waited on
    Busy,
    /// Reported an outcome before its deadline
    Finished,
    /// Killed at its deadline and detached
    Killed,
    /// Panicked, failed to confine itself or vanished
    Dead,
}

#[derive(Debug)]
enum Outcome {
    Completed(Completion),
    Confinement(SkiffError),
    Panicked(String),
}

/// One execution on a dedicated thread
///
/// The thread confines itself with [`sandbox::confine`] and then runs the
/// entry point. A worker that misses its deadline is killed and detached;
/// its thread unwinds on its own at the next kill-switch poll.
#[derive(Debug)]
pub struct Worker {
    pub id: u64,
    pub state: WorkerState,
    kill: KillSwitch,
    outcome: Receiver<Outcome>,
    handle: Option<JoinHandle<()>>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

impl Worker {
    pub fn spawn(
        program: Arc<Program>,
        entry: EntryPoint,
        permissions: PermissionSet,
        config: &RunConfig,
    ) -> Result<Self> {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let kill = KillSwitch::new();
        let (tx, rx) = mpsc::channel();
        let limits = Limits {
            max_call_depth: config.max_call_depth,
            max_array_length: config.max_array_length,
        };
        let mode = config.sandbox;

        tracing::debug!(worker_id = id, class = %entry.class, method = %entry.method, "spawning worker");

        let thread_kill = kill.clone();
        let handle = thread::Builder::new()
            .name(format!("skiff-worker-{id}"))
            .stack_size(config.worker_stack_size)
            .spawn(move || {
                if let Err(e) = sandbox::confine(&permissions, mode) {
                    let _ = tx.send(Outcome::Confinement(e));
                    return;
                }
                let run = panic::catch_unwind(AssertUnwindSafe(|| {
                    Interpreter::new(&program, &permissions, thread_kill, limits).run(&entry)
                }));
                let outcome = match run {
                    Ok(completion) => Outcome::Completed(completion),
                    Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
                };
                // The supervisor has stopped listening once the deadline passed
                let _ = tx.send(outcome);
            })?;

        Ok(Self {
            id,
            state: WorkerState::Busy,
            kill,
            outcome: rx,
            handle: Some(handle),
        })
    }

    /// Wait up to `timeout` for the worker's completion
    ///
    /// On timeout the worker is killed before this returns, so it can no
    /// longer write to a console destination installed afterwards.
    pub fn wait(&mut self, timeout: Duration) -> Result<Completion> {
        match self.outcome.recv_timeout(timeout) {
            Ok(Outcome::Completed(Completion::Killed)) | Err(RecvTimeoutError::Timeout) => {
                self.kill.kill();
                self.state = WorkerState::Killed;
                self.handle = None;
                tracing::warn!(worker_id = self.id, timeout_ms = timeout.as_millis(), "worker killed at deadline");
                Err(SkiffError::ExecutionTimeout(timeout))
            }
            Ok(Outcome::Completed(completion)) => {
                self.state = WorkerState::Finished;
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                tracing::debug!(worker_id = self.id, ?completion, "worker finished");
                Ok(completion)
            }
            Ok(Outcome::Confinement(e)) => {
                self.state = WorkerState::Dead;
                tracing::error!(worker_id = self.id, error = %e, "worker could not be confined");
                Err(e)
            }
            Ok(Outcome::Panicked(message)) => {
                self.state = WorkerState::Dead;
                tracing::error!(worker_id = self.id, %message, "worker panicked");
                Err(SkiffError::Worker(format!("worker {} panicked: {message}", self.id)))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.state = WorkerState::Dead;
                Err(SkiffError::Worker(format!("worker {} exited without reporting", self.id)))
            }
        }
    }

    pub fn kill(&self) {
        self.kill.kill();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.state == WorkerState::Busy {
            self.kill.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_returns_early_when_killed() {
        let kill = KillSwitch::new();
        let sleeper = kill.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        kill.kill();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn sleep_runs_to_completion() {
        let kill = KillSwitch::new();
        assert!(!kill.sleep(Duration::from_millis(5)));
        kill.kill();
        assert!(kill.sleep(Duration::from_secs(30)));
        assert!(kill.is_killed());
    }
}
