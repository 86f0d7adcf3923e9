// In: src/ffi/mod.rs

//! Language bindings. Each binding drives its own host runtime on the
//! interpreter thread that created it.

#[cfg(feature = "python")]
pub mod python;
