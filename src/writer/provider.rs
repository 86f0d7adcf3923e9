// In: src/writer/provider.rs

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};
use crate::host::{HostException, HostFunction, HostObject, HostValue};
use crate::proxy::LifetimeProxy;
use crate::writer::blob::{self, Blob};

/// Pull-based source of an item's bytes.
///
/// The engine calls `feed` until it has received `size` bytes. An empty blob
/// means the source is exhausted.
pub trait ContentProvider: Send {
    fn size(&self) -> u64;
    fn feed(&mut self) -> Result<Blob>;
}

/// Serves an in-memory buffer in a single chunk.
#[derive(Debug, Clone)]
pub struct StringProvider {
    content: Blob,
    fed: bool,
}

impl StringProvider {
    pub fn new(content: impl Into<Blob>) -> Self {
        Self {
            content: content.into(),
            fed: false,
        }
    }
}

impl ContentProvider for StringProvider {
    fn size(&self) -> u64 {
        self.content.size()
    }

    fn feed(&mut self) -> Result<Blob> {
        if self.fed {
            return Ok(Blob::empty());
        }
        self.fed = true;
        Ok(self.content.clone())
    }
}

/// Reads a file in fixed-size chunks.
#[derive(Debug)]
pub struct FileProvider {
    path: PathBuf,
    size: u64,
    chunk_size: usize,
    file: Option<File>,
}

impl FileProvider {
    pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_chunk_size(path, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = std::fs::metadata(&path)
            .map_err(|e| BridgeError::Io(format!("{}: {}", path.display(), e)))?
            .len();
        Ok(Self {
            path,
            size,
            chunk_size: chunk_size.max(1),
            file: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentProvider for FileProvider {
    fn size(&self) -> u64 {
        self.size
    }

    fn feed(&mut self) -> Result<Blob> {
        let file = match &mut self.file {
            Some(file) => file,
            slot => slot.insert(File::open(&self.path)?),
        };
        let mut chunk = Vec::with_capacity(self.chunk_size);
        file.by_ref()
            .take(self.chunk_size as u64)
            .read_to_end(&mut chunk)?;
        Ok(Blob::new(chunk))
    }
}

//==================================================================================
// Host-side provider objects
//==================================================================================

/// Class tags of host provider objects.
pub const STRING_PROVIDER_CLASS: &str = "StringProvider";
pub const FILE_PROVIDER_CLASS: &str = "FileProvider";

/// Internal slot of a host provider object. Empty once moved into the engine.
pub(crate) struct HostProviderSlot(Option<LifetimeProxy<dyn ContentProvider>>);

/// Wraps a native provider in a host object that owns it.
///
/// The object exposes `size`, `getSize()` and `feed()`. Handing it to the
/// engine with [`take_native_provider`] moves the provider out; afterwards
/// every method raises.
pub fn provider_to_host(class: &'static str, provider: Box<dyn ContentProvider>) -> HostObject {
    let obj = HostObject::with_class(class);
    obj.set("size", HostValue::Number(provider.size() as f64));
    obj.set_internal(HostProviderSlot(Some(LifetimeProxy::owned(class, provider))));

    let this = obj.downgrade();
    obj.set(
        "getSize",
        HostFunction::new(move |_| {
            let obj = this.upgrade().ok_or_else(|| moved_error(class))?;
            let slot = obj.internal::<HostProviderSlot>();
            let size = slot
                .as_ref()
                .and_then(|slot| slot.0.as_ref())
                .ok_or_else(|| moved_error(class))?
                .with(|p| p.size())
                .map_err(|e| HostException::new(e.to_string()))?;
            Ok(HostValue::Number(size as f64))
        }),
    );

    let this = obj.downgrade();
    obj.set(
        "feed",
        HostFunction::new(move |_| {
            let obj = this.upgrade().ok_or_else(|| moved_error(class))?;
            let mut slot = obj.internal_mut::<HostProviderSlot>();
            let proxy = slot
                .as_mut()
                .and_then(|slot| slot.0.as_mut())
                .ok_or_else(|| moved_error(class))?;
            let chunk = proxy
                .with_mut(|p| p.feed())
                .and_then(|fed| fed)
                .map_err(|e| HostException::new(e.to_string()))?;
            drop(slot);
            Ok(HostValue::Object(blob::to_host(&chunk)))
        }),
    );
    obj
}

fn moved_error(class: &str) -> HostException {
    HostException::new(format!("{} has been moved and is no longer valid", class))
}

pub fn host_string_provider(content: &HostValue) -> HostObject {
    let content = match blob::from_host(content) {
        Some(blob) => blob,
        None => match content {
            HostValue::Bytes(bytes) => Blob::from(bytes.as_slice()),
            other => Blob::from(other.to_display_string()),
        },
    };
    provider_to_host(STRING_PROVIDER_CLASS, Box::new(StringProvider::new(content)))
}

pub fn host_file_provider(path: &HostValue) -> Result<HostObject> {
    let provider = FileProvider::new(path.to_display_string())?;
    Ok(provider_to_host(FILE_PROVIDER_CLASS, Box::new(provider)))
}

/// Moves the native provider out of a host provider object.
///
/// Returns `Ok(None)` if `obj` is not a native provider wrapper, and an error
/// if it is one whose provider was already moved.
pub fn take_native_provider(obj: &HostObject) -> Result<Option<Box<dyn ContentProvider>>> {
    let Some(mut slot) = obj.internal_mut::<HostProviderSlot>() else {
        return Ok(None);
    };
    match slot.0.take() {
        Some(proxy) => proxy.into_owned().map(Some),
        None => Err(BridgeError::ProxyReleased(obj.class_name().to_string())),
    }
}
