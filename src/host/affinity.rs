// In: src/host/affinity.rs

use std::fmt;
use std::mem::ManuallyDrop;
use std::thread::{self, ThreadId};

use crate::error::{BridgeError, Result};
use crate::host::runtime::{HostScope, RuntimeHandle};

/// A host-only value that may be carried by, but not used from, other threads.
///
/// Access is checked at runtime against the thread that created the cell. If
/// the cell is dropped elsewhere, the value is shipped back to the host queue
/// and dropped there; if the host is already gone it is leaked rather than
/// dropped on the wrong thread.
pub struct HostBound<T: 'static> {
    value: ManuallyDrop<T>,
    origin: ThreadId,
    runtime: RuntimeHandle,
    label: &'static str,
}

// SAFETY: the inner value is only reachable through `get`, which refuses every
// thread but `origin`, and `Drop` never drops it off `origin`.
unsafe impl<T: 'static> Send for HostBound<T> {}
unsafe impl<T: 'static> Sync for HostBound<T> {}

impl<T: 'static> HostBound<T> {
    pub fn new(scope: &HostScope, label: &'static str, value: T) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            origin: scope.guard().host_thread(),
            runtime: scope.handle().clone(),
            label,
        }
    }

    pub fn get(&self) -> Result<&T> {
        if self.is_origin_thread() {
            Ok(&self.value)
        } else {
            Err(BridgeError::WrongThread(self.label.to_string()))
        }
    }

    pub fn is_origin_thread(&self) -> bool {
        thread::current().id() == self.origin
    }
}

impl<T: 'static> fmt::Debug for HostBound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBound")
            .field("label", &self.label)
            .field("origin", &self.origin)
            .finish()
    }
}

struct ShipHome<T>(T);

// SAFETY: the payload is only unwrapped by the task below after it has checked
// it is running on the origin thread.
unsafe impl<T> Send for ShipHome<T> {}

impl<T> ShipHome<T> {
    fn into_inner(self) -> T {
        self.0
    }
}

impl<T: 'static> Drop for HostBound<T> {
    fn drop(&mut self) {
        // SAFETY: `value` is not touched again after this.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        if self.is_origin_thread() {
            drop(value);
            return;
        }

        let origin = self.origin;
        let label = self.label;
        let parcel = ShipHome(value);
        self.runtime.schedule(Box::new(move |_dispatch| {
            let value = parcel.into_inner();
            if thread::current().id() == origin {
                drop(value);
            } else {
                log::warn!("host runtime gone; leaking {} instead of dropping it off-thread", label);
                std::mem::forget(value);
            }
        }));
    }
}
