// In: src/proxy/mod.rs

//! Native values seen from the host, and host objects seen from native code.
//!
//! [`LifetimeProxy`] fixes, once, whether a proxy owns its native value or
//! merely borrows it. [`ProxyRegistry`] keeps one host view per native value
//! and drops its bookkeeping when the host collects that view.

pub mod lifetime;
pub mod registry;

pub use lifetime::{LifetimeProxy, Ownership};
pub use registry::{ProxyKey, ProxyRegistry};
