// In: src/error.rs

//! This module defines the single, unified error type for the entire bridge.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.

#[cfg(feature = "python")]
use pyo3::PyErr;
use thiserror::Error;

use crate::host::HostException;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    // =========================================================================
    // === Construction Errors (fatal to the adapter being built)
    // =========================================================================
    #[error("Construction failed: {0}")]
    Construction(String),

    #[error("Size was not converted to a u64 losslessly: {0}")]
    SizeConversion(String),

    // =========================================================================
    // === Cross-Thread Invocation Errors
    // =========================================================================
    /// The host-side logic raised while servicing a call.
    #[error("Error in {bridge}: {message}")]
    HostException { bridge: String, message: String },

    /// The host-side logic returned a value of the wrong shape.
    #[error("Error in {bridge}: expected {expected}, got {found}")]
    UnexpectedType {
        bridge: String,
        expected: String,
        found: String,
    },

    /// The host runtime was torn down before the call could be serviced.
    #[error("Host runtime unavailable ({0}): environment is shut down")]
    RuntimeUnavailable(String),

    /// Host-only state was touched from a thread that is not the host thread.
    #[error("{0} may only be used on the host thread")]
    WrongThread(String),

    #[error("Pending result for call #{0} was already fulfilled")]
    AlreadyFulfilled(u64),

    // =========================================================================
    // === Lifetime & Protocol Errors
    // =========================================================================
    /// A borrowed proxy outlived the native value it pointed at.
    #[error("{0} has been released and is no longer valid")]
    ProxyReleased(String),

    /// The caller broke the calling contract (e.g. feeding past the declared size).
    #[error("Caller error: {0}")]
    CallerError(String),

    // =========================================================================
    // === Engine Errors
    // =========================================================================
    #[error("Archive engine failed: {0}")]
    Engine(String),

    #[error("Entry not found: {0}")]
    NotFound(String),

    // =========================================================================
    // === External Error Wrappers
    // =========================================================================
    /// An error originating from the underlying I/O subsystem. Kept as a string
    /// so the enum stays `Clone` for fan-out to every waiting worker.
    #[error("I/O error: {0}")]
    Io(String),

    /// An error from the Serde JSON library, typically while persisting the archive image.
    #[error("Serde JSON error: {0}")]
    SerdeJson(String),

    /// An error for Python FFI operations.
    #[error("FFI operation failed: {0}")]
    FfiError(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Wraps a raised host exception with the name of the bridge that carried it.
    pub fn from_host(bridge: &str, exception: HostException) -> Self {
        BridgeError::HostException {
            bridge: bridge.to_string(),
            message: exception.message,
        }
    }

    pub fn unexpected(bridge: &str, expected: &str, found: &str) -> Self {
        BridgeError::UnexpectedType {
            bridge: bridge.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Attributes an unlabelled host error (raised via `?`) to `bridge`.
    pub fn in_bridge(self, name: &str) -> Self {
        match self {
            BridgeError::HostException { bridge, message } if bridge == HOST_LABEL => {
                BridgeError::HostException {
                    bridge: name.to_string(),
                    message,
                }
            }
            other => other,
        }
    }
}

const HOST_LABEL: &str = "host";

// =============================================================================
// === Manual `From` Implementations ===
// =============================================================================

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::SerdeJson(err.to_string())
    }
}

impl From<HostException> for BridgeError {
    fn from(err: HostException) -> Self {
        BridgeError::HostException {
            bridge: HOST_LABEL.to_string(),
            message: err.message,
        }
    }
}

#[cfg(feature = "python")]
impl From<PyErr> for BridgeError {
    fn from(err: PyErr) -> Self {
        BridgeError::FfiError(err.to_string())
    }
}

#[cfg(feature = "python")]
impl From<BridgeError> for PyErr {
    fn from(err: BridgeError) -> PyErr {
        pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
    }
}
