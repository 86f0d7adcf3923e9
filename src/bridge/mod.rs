// In: src/bridge/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Bridge Layer
// ====================================================================================
//
// The archive engine runs its own worker threads. The host (scripting runtime) is
// single-threaded and cooperative: its objects may only be touched from its own
// thread, during a turn of its event loop. The bridge is the only way engine code
// reaches host logic.
//
// Call Flow (worker thread):
//
//   1. [Engine worker]  -> bridge.invoke(args)
//         |
//         `-> MainThreadGuard::classify() == Worker
//         |
//         `-> wrap args in a CallEnvelope, queue a task on the RuntimeHandle
//         |
//         `-> block on the envelope's PendingResult
//
//   2. [Host thread, next turn] -> task runs with Dispatch::Live
//         |
//         `-> take args, run the host callable (panics are caught)
//         |
//         `-> fulfil the PendingResult with the value or the error
//
//   3. [Engine worker]  -> wakes up with Result<Resp, BridgeError>
//
// Call Flow (host thread):
//
//   1. [Host thread]    -> bridge.invoke(args)
//         |
//         `-> MainThreadGuard::classify() == HostThread -> callable runs inline.
//             Queuing here would wait on the very loop we are blocking.
//
// If the runtime shuts down with calls still queued, each one is failed with
// `RuntimeUnavailable` so no worker waits forever.
//
// ====================================================================================
pub mod envelope;
pub mod guard;
pub mod tsfn;

pub use envelope::{CallEnvelope, PendingResult};
pub use guard::{CallSite, MainThreadGuard};
pub use tsfn::{HostCallable, ThreadSafeCallbackBridge};

#[cfg(test)]
mod tests;
