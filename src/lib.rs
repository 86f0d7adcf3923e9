//! This file is the root of the `zim_bridge` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of our library (`bridge`, `writer`, etc.)
//!     so the Rust compiler knows they exist.
//! 2.  Defining the `#[pymodule]` which acts as the main entry point when the
//!     compiled library is imported into Python (with the `python` feature).

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
//==================================================================================
// 1. Module Declarations
//==================================================================================
#[macro_use]
mod observability; // Make macros available throughout the crate

pub mod bridge;
pub mod config;
pub mod error;
pub mod host;
pub mod module;
pub mod proxy;
pub mod reader;
pub mod writer;

mod ffi;

pub use error::{BridgeError, Result};
pub use observability::init_logging;

//==================================================================================
// 2. Python Module Definition
//==================================================================================
#[cfg(feature = "python")]
use pyo3::prelude::*;

/// The `zim_bridge` Python module.
#[cfg(feature = "python")]
#[pymodule]
fn zim_bridge(m: &Bound<'_, PyModule>) -> PyResult<()> {
    use ffi::python::{
        enable_verbose_logging_py, file_provider_py, string_provider_py, PyArchive, PyBlob,
        PyContentProvider, PyCreator, PySearch, PySearcher, PySuggestionSearch,
        PySuggestionSearcher,
    };

    // --- Classes ---
    m.add_class::<PyBlob>()?;
    m.add_class::<PyContentProvider>()?;
    m.add_class::<PyCreator>()?;
    m.add_class::<PyArchive>()?;
    m.add_class::<PySearcher>()?;
    m.add_class::<PySearch>()?;
    m.add_class::<PySuggestionSearcher>()?;
    m.add_class::<PySuggestionSearch>()?;

    // --- Provider constructors ---
    m.add_function(wrap_pyfunction!(string_provider_py, m)?)?;
    m.add_function(wrap_pyfunction!(file_provider_py, m)?)?;

    // --- Expose the custom error type ---
    m.add(
        "ZimBridgeError",
        m.py().get_type_bound::<pyo3::exceptions::PyRuntimeError>(),
    )?;

    // --- Expose version string as a module attribute ---
    m.add("__version__", VERSION)?;

    // --- Logging ---
    m.add_function(wrap_pyfunction!(enable_verbose_logging_py, m)?)?;

    Ok(())
}
