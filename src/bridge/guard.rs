// In: src/bridge/guard.rs

use std::thread::{self, ThreadId};

use crate::error::{BridgeError, Result};

/// Where a call is being made from, relative to the host thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    /// The caller is the host thread; invoking host logic inline is safe.
    HostThread,
    /// Any other thread; host logic must be reached through the runtime queue.
    Worker,
}

/// Records the identity of the host thread at construction and answers
/// "am I on it?" for every later caller.
#[derive(Debug, Clone)]
pub struct MainThreadGuard {
    host_thread: ThreadId,
    label: String,
}

impl MainThreadGuard {
    /// Captures the calling thread as the host thread.
    pub fn current(label: impl Into<String>) -> Self {
        Self {
            host_thread: thread::current().id(),
            label: label.into(),
        }
    }

    pub fn host_thread(&self) -> ThreadId {
        self.host_thread
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_host_thread(&self) -> bool {
        thread::current().id() == self.host_thread
    }

    pub fn classify(&self) -> CallSite {
        if self.is_host_thread() {
            CallSite::HostThread
        } else {
            CallSite::Worker
        }
    }

    /// Fails with `WrongThread` naming `what` when called off the host thread.
    pub fn ensure_host_thread(&self, what: &str) -> Result<()> {
        match self.classify() {
            CallSite::HostThread => Ok(()),
            CallSite::Worker => Err(BridgeError::WrongThread(format!(
                "{} ({})",
                what, self.label
            ))),
        }
    }
}
