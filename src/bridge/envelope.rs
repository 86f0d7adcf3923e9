// In: src/bridge/envelope.rs

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::{BridgeError, Result};

enum Slot<T> {
    Empty,
    Ready(Result<T>),
    Taken,
}

/// A one-shot rendezvous between the worker that asked and the host that answers.
///
/// It is fulfilled at most once (value or error) and consumed at most once.
pub struct PendingResult<T> {
    call_id: u64,
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> PendingResult<T> {
    pub fn new(call_id: u64) -> Self {
        Self {
            call_id,
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_value(&self, value: T) -> Result<()> {
        self.fulfil(Ok(value))
    }

    pub fn set_exception(&self, error: BridgeError) -> Result<()> {
        self.fulfil(Err(error))
    }

    pub fn fulfil(&self, outcome: Result<T>) -> Result<()> {
        let mut slot = self.lock();
        if !matches!(*slot, Slot::Empty) {
            return Err(BridgeError::AlreadyFulfilled(self.call_id));
        }
        *slot = Slot::Ready(outcome);
        drop(slot);
        self.ready.notify_all();
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lock(), Slot::Ready(_))
    }

    /// Blocks until fulfilled, then hands the outcome over. There is no timeout.
    pub fn wait(&self) -> Result<T> {
        let mut slot = self.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(outcome) => return outcome,
                Slot::Taken => {
                    return Err(BridgeError::CallerError(format!(
                        "result of call #{} was already consumed",
                        self.call_id
                    )))
                }
                Slot::Empty => {
                    *slot = Slot::Empty;
                    slot = self
                        .ready
                        .wait(slot)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

impl<T> fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.lock() {
            Slot::Empty => "empty",
            Slot::Ready(_) => "ready",
            Slot::Taken => "taken",
        };
        f.debug_struct("PendingResult")
            .field("call_id", &self.call_id)
            .field("state", &state)
            .finish()
    }
}

/// One cross-thread call in flight: the arguments going to the host and the
/// slot the answer comes back through.
pub struct CallEnvelope<Req, Resp> {
    id: u64,
    args: Mutex<Option<Req>>,
    result: PendingResult<Resp>,
}

impl<Req, Resp> CallEnvelope<Req, Resp> {
    pub fn new(id: u64, args: Req) -> Self {
        Self {
            id,
            args: Mutex::new(Some(args)),
            result: PendingResult::new(id),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Moves the arguments out. Only the first caller gets them.
    pub fn take_args(&self) -> Option<Req> {
        self.args
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn result(&self) -> &PendingResult<Resp> {
        &self.result
    }
}
