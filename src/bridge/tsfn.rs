// In: src/bridge/tsfn.rs

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::bridge::envelope::CallEnvelope;
use crate::bridge::guard::{CallSite, MainThreadGuard};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::host::runtime::{catch_host_panic, Dispatch, HostScope, RuntimeHandle};
use crate::host::HostBound;

/// Host logic behind a bridge. Runs on the host thread only.
pub type HostCallable<Req, Resp> = Box<dyn Fn(Req) -> Result<Resp>>;

struct Slots {
    queued: usize,
}

struct BridgeInner<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    name: String,
    capacity: usize,
    callable: HostBound<HostCallable<Req, Resp>>,
    guard: MainThreadGuard,
    runtime: RuntimeHandle,
    slots: Mutex<Slots>,
    slot_freed: Condvar,
    next_id: AtomicU64,
    serviced: AtomicU64,
}

/// Lets any thread call one piece of host logic synchronously.
///
/// From the host thread the callable runs inline. From any other thread the
/// arguments are wrapped in a [`CallEnvelope`], queued on the host runtime, and
/// the caller blocks until the host has run the callable and fulfilled the
/// envelope's result. Queued calls are serviced in submission order, one at a
/// time.
///
/// A `capacity` of 0 means the queue is unbounded; otherwise a worker waits for
/// a free slot before queuing. Dropping the bridge releases it; the callable is
/// dropped on the host thread.
pub struct ThreadSafeCallbackBridge<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    inner: Arc<BridgeInner<Req, Resp>>,
}

impl<Req, Resp> ThreadSafeCallbackBridge<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Must be called on the host thread; `scope` proves it.
    pub fn new(
        scope: &HostScope,
        name: impl Into<String>,
        capacity: usize,
        callable: impl Fn(Req) -> Result<Resp> + 'static,
    ) -> Self {
        let name = name.into();
        log::debug!(
            "[{}] bridge '{}' created (capacity {})",
            scope.name(),
            name,
            if capacity == 0 { "unbounded".to_string() } else { capacity.to_string() }
        );
        let callable: HostCallable<Req, Resp> = Box::new(callable);
        Self {
            inner: Arc::new(BridgeInner {
                callable: HostBound::new(scope, "bridge callable", callable),
                guard: scope.guard().clone(),
                runtime: scope.handle().clone(),
                name,
                capacity,
                slots: Mutex::new(Slots { queued: 0 }),
                slot_freed: Condvar::new(),
                next_id: AtomicU64::new(0),
                serviced: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(
        scope: &HostScope,
        config: &BridgeConfig,
        callable: impl Fn(Req) -> Result<Resp> + 'static,
    ) -> Self {
        Self::new(scope, config.name.clone(), config.queue_capacity, callable)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn guard(&self) -> &MainThreadGuard {
        &self.inner.guard
    }

    /// Number of calls that went through the host queue.
    pub fn calls_serviced(&self) -> u64 {
        self.inner.serviced.load(Ordering::Relaxed)
    }

    /// Calls the host logic and returns its result, from any thread.
    pub fn invoke(&self, args: Req) -> Result<Resp> {
        match self.inner.guard.classify() {
            CallSite::HostThread => self.inner.call_inline(args),
            CallSite::Worker => self.inner.submit(args),
        }
    }
}

impl<Req, Resp> BridgeInner<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn lock_slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn call_inline(&self, args: Req) -> Result<Resp> {
        let callable = self.callable.get()?;
        match catch_host_panic(|| callable(args)) {
            Ok(outcome) => outcome.map_err(|e| e.in_bridge(&self.name)),
            Err(panic) => Err(BridgeError::HostException {
                bridge: self.name.clone(),
                message: panic,
            }),
        }
    }

    fn submit(self: &Arc<Self>, args: Req) -> Result<Resp> {
        self.acquire_slot();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = Arc::new(CallEnvelope::new(id, args));

        let mut queued = QueuedCall {
            inner: Arc::clone(self),
            envelope: Some(Arc::clone(&envelope)),
        };
        log_metric!("event" = "bridge_submit", "bridge" = &self.name, "call" = &id);
        self.runtime
            .schedule(Box::new(move |dispatch| queued.run(dispatch)));

        envelope.result().wait()
    }

    fn acquire_slot(&self) {
        let mut slots = self.lock_slots();
        while self.capacity > 0 && slots.queued >= self.capacity {
            slots = self
                .slot_freed
                .wait(slots)
                .unwrap_or_else(PoisonError::into_inner);
        }
        slots.queued += 1;
    }

    fn release_slot(&self) {
        let mut slots = self.lock_slots();
        slots.queued = slots.queued.saturating_sub(1);
        drop(slots);
        self.slot_freed.notify_one();
    }

    /// The queued task. Runs on the host thread, or on whichever thread saw the
    /// runtime shut down.
    fn service(&self, envelope: &CallEnvelope<Req, Resp>, dispatch: Dispatch) {
        self.release_slot();
        let outcome = match dispatch {
            Dispatch::Shutdown => Err(BridgeError::RuntimeUnavailable(self.name.clone())),
            Dispatch::Live => match envelope.take_args() {
                Some(args) => self.call_inline(args),
                None => Err(BridgeError::CallerError(format!(
                    "arguments of call #{} were already consumed",
                    envelope.id()
                ))),
            },
        };
        self.serviced.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = envelope.result().fulfil(outcome) {
            log::error!("[{}] {}", self.name, e);
        }
    }
}

/// The queued half of a cross-thread call. If the task is dropped without
/// having run, the waiting worker gets `RuntimeUnavailable`.
struct QueuedCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    inner: Arc<BridgeInner<Req, Resp>>,
    envelope: Option<Arc<CallEnvelope<Req, Resp>>>,
}

impl<Req, Resp> QueuedCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn run(&mut self, dispatch: Dispatch) {
        if let Some(envelope) = self.envelope.take() {
            self.inner.service(&envelope, dispatch);
        }
    }
}

impl<Req, Resp> Drop for QueuedCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn drop(&mut self) {
        if let Some(envelope) = self.envelope.take() {
            log::warn!(
                "[{}] call #{} dropped before the host ran it",
                self.inner.name,
                envelope.id()
            );
            self.inner.service(&envelope, Dispatch::Shutdown);
        }
    }
}

impl<Req, Resp> Drop for ThreadSafeCallbackBridge<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn drop(&mut self) {
        log::debug!(
            "bridge '{}' released after {} queued call(s)",
            self.inner.name,
            self.calls_serviced()
        );
    }
}

impl<Req, Resp> fmt::Debug for ThreadSafeCallbackBridge<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeCallbackBridge")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
