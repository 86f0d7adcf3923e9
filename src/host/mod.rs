// In: src/host/mod.rs

//! An in-process model of the single-threaded scripting host: its values,
//! its event loop, and a cell for keeping host-only state off other threads.

pub mod affinity;
pub mod runtime;
pub mod value;

pub use affinity::HostBound;
pub use runtime::{Dispatch, HostRuntime, HostScope, RuntimeHandle, WorkerTask};
pub use value::{
    FinalizerToken, HostException, HostFunction, HostObject, HostValue, WeakHostObject,
    MAX_SAFE_INTEGER,
};
