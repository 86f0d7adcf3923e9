// In: src/host/runtime.rs

//! The host's event loop.
//!
//! The host runs on exactly one thread and executes queued tasks one at a time,
//! in the order they were scheduled. Other threads never run host logic; they
//! hand a task to a [`RuntimeHandle`] and wait for the host to get to it.
//!
//! Ownership is split three ways:
//!
//! * [`HostRuntime`] owns the loop. Dropping it shuts the loop down, and every
//!   task still queued is told so via [`Dispatch::Shutdown`].
//! * [`HostScope`] is a cheap, `!Send` view of a live runtime. Anything that
//!   must be created on the host thread (bridges, thread-affine cells, proxies)
//!   takes a `&HostScope`. `HostRuntime` derefs to one.
//! * [`RuntimeHandle`] is the `Send + Sync` scheduling handle workers hold.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::bridge::guard::MainThreadGuard;
use crate::error::{BridgeError, Result};

/// How a scheduled task is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// On the host thread, during a turn of the loop.
    Live,
    /// The environment is gone. The task must not touch host state; it runs on
    /// whichever thread noticed the shutdown.
    Shutdown,
}

pub type HostTask = Box<dyn FnOnce(Dispatch) + Send + 'static>;

struct QueueState {
    tasks: VecDeque<HostTask>,
    closed: bool,
}

struct RuntimeShared {
    name: String,
    state: Mutex<QueueState>,
    wake: Condvar,
}

impl RuntimeShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//==================================================================================
// I. Scheduling handle (any thread)
//==================================================================================

#[derive(Clone)]
pub struct RuntimeHandle {
    shared: Arc<RuntimeShared>,
}

impl RuntimeHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queues `task` for the host thread. Returns `false` if the runtime has
    /// shut down, in which case `task` has already run with [`Dispatch::Shutdown`].
    pub fn schedule(&self, task: HostTask) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            drop(state);
            task(Dispatch::Shutdown);
            return false;
        }
        state.tasks.push_back(task);
        drop(state);
        self.shared.wake.notify_all();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Wakes a host thread blocked in [`HostScope::run_until`] so it re-checks its condition.
    pub fn notify(&self) {
        let _state = self.shared.lock();
        self.shared.wake.notify_all();
    }
}

//==================================================================================
// II. Host-thread view
//==================================================================================

/// A `!Send` capability proving the holder is on the host thread of a runtime.
#[derive(Clone)]
pub struct HostScope {
    handle: RuntimeHandle,
    guard: MainThreadGuard,
    _not_send: PhantomData<Rc<()>>,
}

impl HostScope {
    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    pub fn guard(&self) -> &MainThreadGuard {
        &self.guard
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Runs one turn: every task queued at the time of the call, in FIFO order.
    /// Tasks scheduled while the turn runs wait for the next one. A panicking
    /// task is logged and the rest of the batch still runs.
    pub fn run_pending(&self) -> usize {
        let batch = std::mem::take(&mut self.handle.shared.lock().tasks);
        let ran = batch.len();
        for task in batch {
            if let Err(panic) = catch_host_panic(|| task(Dispatch::Live)) {
                log::error!("[{}] host task panicked: {}", self.name(), panic);
            }
        }
        if ran > 0 {
            log::trace!("[{}] ran {} host task(s)", self.name(), ran);
        }
        ran
    }

    /// Pumps the loop until `done` returns true, sleeping while there is
    /// nothing to run. Workers that flip the condition must call
    /// [`RuntimeHandle::notify`] afterwards.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) {
        loop {
            self.run_pending();
            let mut state = self.handle.shared.lock();
            while state.tasks.is_empty() && !state.closed && !done() {
                state = self
                    .handle
                    .shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            let finished = state.tasks.is_empty() && (state.closed || done());
            drop(state);
            if finished {
                return;
            }
        }
    }

    /// Starts `f` on a new worker thread. The worker signals the runtime when it
    /// exits, including by panic.
    pub fn spawn_worker<T, F>(&self, name: &str, f: F) -> Result<WorkerTask<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let finished = Arc::new(AtomicBool::new(false));
        let signal = CompletionSignal {
            finished: Arc::clone(&finished),
            handle: self.handle.clone(),
        };
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _signal = signal;
                f()
            })?;
        Ok(WorkerTask {
            name: name.to_string(),
            join,
            finished,
        })
    }

    /// Runs `f` on a worker while this (host) thread keeps servicing the queue,
    /// so `f` may call back into the host without deadlocking.
    pub fn run_worker<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let task = self.spawn_worker(name, f)?;
        self.run_until(|| task.is_finished());
        task.join()
    }
}

struct CompletionSignal {
    finished: Arc<AtomicBool>,
    handle: RuntimeHandle,
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::SeqCst);
        self.handle.notify();
    }
}

/// A worker started with [`HostScope::spawn_worker`].
pub struct WorkerTask<T> {
    name: String,
    join: JoinHandle<T>,
    finished: Arc<AtomicBool>,
}

impl<T> WorkerTask<T> {
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn join(self) -> Result<T> {
        let name = self.name;
        self.join.join().map_err(|payload| {
            BridgeError::Engine(format!(
                "worker '{}' panicked: {}",
                name,
                panic_message(payload.as_ref())
            ))
        })
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `f`, turning a panic into an `Err` carrying the panic message.
pub(crate) fn catch_host_panic<R>(f: impl FnOnce() -> R) -> std::result::Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

//==================================================================================
// III. Owning runtime
//==================================================================================

pub struct HostRuntime {
    scope: HostScope,
}

impl HostRuntime {
    /// Creates a runtime whose host thread is the calling thread.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let shared = Arc::new(RuntimeShared {
            name: name.clone(),
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                closed: false,
            }),
            wake: Condvar::new(),
        });
        log::debug!("[{}] host runtime started", name);
        Self {
            scope: HostScope {
                handle: RuntimeHandle { shared },
                guard: MainThreadGuard::current(name),
                _not_send: PhantomData,
            },
        }
    }

    pub fn scope(&self) -> HostScope {
        self.scope.clone()
    }

    /// Closes the queue. Queued tasks run with [`Dispatch::Shutdown`] and later
    /// schedules are refused. Idempotent.
    pub fn shutdown(&self) {
        let pending = {
            let mut state = self.scope.handle.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };
        log::debug!(
            "[{}] host runtime shutting down, failing {} queued task(s)",
            self.scope.name(),
            pending.len()
        );
        for task in pending {
            if let Err(panic) = catch_host_panic(|| task(Dispatch::Shutdown)) {
                log::error!("[{}] host task panicked on shutdown: {}", self.scope.name(), panic);
            }
        }
        self.scope.handle.shared.wake.notify_all();
    }
}

impl Deref for HostRuntime {
    type Target = HostScope;

    fn deref(&self) -> &HostScope {
        &self.scope
    }
}

impl Drop for HostRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
