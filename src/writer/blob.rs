// In: src/writer/blob.rs

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::host::{HostFunction, HostObject, HostValue};

/// Class tag of host-side blob objects.
pub const BLOB_CLASS: &str = "Blob";

/// An immutable, cheaply cloned byte buffer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Blob {
    data: Arc<[u8]>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// A copy of `len` bytes starting at `offset`, clamped to the blob.
    pub fn slice(&self, offset: u64, len: u64) -> Blob {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.data.len());
        let end = usize::try_from(offset.saturating_add(len))
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        Blob::from(&self.data[start..end])
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.data, &b.data)
    }
}

impl Default for Blob {
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for Blob {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for Blob {
    fn from(data: &[u8]) -> Self {
        Self { data: data.into() }
    }
}

impl From<&str> for Blob {
    fn from(s: &str) -> Self {
        Self::from(s.as_bytes())
    }
}

impl From<String> for Blob {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.data))
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob(len={})", self.data.len())
    }
}

//==================================================================================
// Host-side blob objects
//==================================================================================

/// Internal slot of a host blob object.
struct HostBlob(Blob);

/// Wraps a native blob for the host. The object shares the buffer; `data`
/// and `toString` are produced from it only when read.
pub fn to_host(blob: &Blob) -> HostObject {
    let obj = HostObject::with_class(BLOB_CLASS);
    obj.set("size", HostValue::Number(blob.size() as f64));
    let shared = blob.clone();
    obj.define_getter(
        "data",
        HostFunction::new(move |_| Ok(HostValue::Bytes(shared.to_vec()))),
    );
    let shared = blob.clone();
    obj.set(
        "toString",
        HostFunction::new(move |_| Ok(HostValue::String(shared.to_string()))),
    );
    obj.set_internal(HostBlob(blob.clone()));
    obj
}

/// Host blob taking ownership of `bytes`.
pub fn host_blob_from_bytes(bytes: Vec<u8>) -> HostObject {
    to_host(&Blob::new(bytes))
}

/// Host blob holding a copy of `bytes`.
pub fn host_blob_from_slice(bytes: &[u8]) -> HostObject {
    to_host(&Blob::from(bytes))
}

/// The host `Blob` constructor: buffers are copied, blobs are shared and
/// anything else goes through string coercion.
pub fn host_blob_from_value(value: &HostValue) -> HostObject {
    if let Some(blob) = from_host(value) {
        return to_host(&blob);
    }
    match value {
        HostValue::Bytes(bytes) => host_blob_from_slice(bytes),
        HostValue::Undefined => host_blob_from_bytes(Vec::new()),
        other => host_blob_from_bytes(other.to_display_string().into_bytes()),
    }
}

/// The native blob behind a host blob object, if `value` is one.
pub fn from_host(value: &HostValue) -> Option<Blob> {
    value
        .as_object()
        .and_then(|obj| obj.internal::<HostBlob>().map(|slot| slot.0.clone()))
}

pub fn is_host_blob(value: &HostValue) -> bool {
    from_host(value).is_some()
}
