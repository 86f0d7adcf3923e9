// In: src/writer/feed.rs

use crate::bridge::ThreadSafeCallbackBridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::host::{HostObject, HostScope, HostValue};
use crate::writer::blob::{self, Blob};
use crate::writer::provider::{take_native_provider, ContentProvider, StringProvider};

/// Bridge label used in errors raised while feeding.
pub const FEED_BRIDGE: &str = "ContentProvider.feed";

/// Turns a host object with `size` and `feed()` into a native [`ContentProvider`].
///
/// `size` is read once, at construction. Every `feed()` is exactly one host
/// call through a [`ThreadSafeCallbackBridge`], so the engine may pull from
/// any of its threads.
pub struct ContentFeedAdapter {
    size: u64,
    delivered: u64,
    calls: u64,
    bridge: ThreadSafeCallbackBridge<(), Blob>,
}

impl ContentFeedAdapter {
    /// Must run on the host thread.
    pub fn new(scope: &HostScope, provider: &HostObject) -> Result<Self> {
        let config = BridgeConfig {
            queue_capacity: 0,
            name: FEED_BRIDGE.to_string(),
        };
        Self::with_config(scope, provider, &config)
    }

    pub fn with_config(
        scope: &HostScope,
        provider: &HostObject,
        config: &BridgeConfig,
    ) -> Result<Self> {
        scope.guard().ensure_host_thread("ContentFeedAdapter::new")?;
        let size = Self::parse_size(&provider.get("size"))?;

        let feed = match provider.get("feed") {
            HostValue::Function(feed) => feed,
            _ => {
                return Err(BridgeError::Construction(
                    "ContentProvider.feed must be a function.".to_string(),
                ))
            }
        };

        let name = config.name.clone();
        let bridge = ThreadSafeCallbackBridge::from_config(scope, config, move |()| {
            let value = feed.call(&[]).map_err(|e| BridgeError::from_host(&name, e))?;
            blob::from_host(&value).ok_or_else(|| {
                BridgeError::unexpected(&name, "an object of type Blob from feed()", value.type_name())
            })
        });

        Ok(Self {
            size,
            delivered: 0,
            calls: 0,
            bridge,
        })
    }

    /// Lossless conversion of a host `size` to `u64`.
    pub fn parse_size(value: &HostValue) -> Result<u64> {
        if value.is_undefined() {
            return Err(BridgeError::Construction(
                "ContentProvider.size is required".to_string(),
            ));
        }
        value.to_u64_lossless()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl ContentProvider for ContentFeedAdapter {
    fn size(&self) -> u64 {
        self.size
    }

    fn feed(&mut self) -> Result<Blob> {
        if self.calls > 0 && self.delivered >= self.size {
            return Err(BridgeError::CallerError(format!(
                "feed() called after all {} declared bytes were delivered",
                self.size
            )));
        }
        let chunk = self.bridge.invoke(())?;
        self.calls += 1;
        self.delivered += chunk.size();
        log::trace!(
            "feed #{}: {} byte(s), {}/{} delivered",
            self.calls,
            chunk.size(),
            self.delivered,
            self.size
        );
        Ok(chunk)
    }
}

/// Converts whatever the host handed over as content into a native provider.
///
/// Native provider wrappers are moved out of their host object; other objects
/// are adapted with [`ContentFeedAdapter`]; strings and buffers are served
/// from memory.
pub fn provider_from_host(
    scope: &HostScope,
    value: &HostValue,
    config: &BridgeConfig,
) -> Result<Box<dyn ContentProvider>> {
    match value {
        HostValue::Object(obj) => {
            if let Some(native) = take_native_provider(obj)? {
                return Ok(native);
            }
            if let Some(blob) = blob::from_host(value) {
                return Ok(Box::new(StringProvider::new(blob)));
            }
            Ok(Box::new(ContentFeedAdapter::with_config(scope, obj, config)?))
        }
        HostValue::String(s) => Ok(Box::new(StringProvider::new(s.as_str()))),
        HostValue::Bytes(bytes) => Ok(Box::new(StringProvider::new(bytes.as_slice()))),
        other => Err(BridgeError::unexpected(
            &config.name,
            "an object from getContentProvider",
            other.type_name(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostException, HostFunction, HostRuntime};
    use std::cell::Cell;
    use std::rc::Rc;

    /// A host provider serving `data` in chunks of `chunk` bytes, counting calls.
    fn chunked_provider(data: &'static [u8], chunk: usize, calls: Rc<Cell<usize>>) -> HostObject {
        let offset = Rc::new(Cell::new(0usize));
        let provider = HostObject::new();
        provider.set("size", HostValue::Number(data.len() as f64));
        provider.set(
            "feed",
            HostFunction::new(move |_| {
                calls.set(calls.get() + 1);
                let start = offset.get().min(data.len());
                let end = (start + chunk).min(data.len());
                offset.set(end);
                Ok(blob::host_blob_from_slice(&data[start..end]).into())
            }),
        );
        provider
    }

    #[test]
    fn test_ten_bytes_in_four_four_two_then_caller_error() {
        let rt = HostRuntime::new("feed");
        let calls = Rc::new(Cell::new(0));
        let provider = chunked_provider(b"0123456789", 4, calls.clone());
        let mut adapter = ContentFeedAdapter::new(&rt, &provider).unwrap();
        assert_eq!(adapter.size(), 10);

        let (chunks, fourth) = rt
            .run_worker("engine", move || {
                let chunks: Vec<Blob> = (0..3).map(|_| adapter.feed().unwrap()).collect();
                (chunks, adapter.feed())
            })
            .unwrap();

        let sizes: Vec<u64> = chunks.iter().map(Blob::size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
        assert_eq!(joined, b"0123456789");
        assert!(matches!(fourth, Err(BridgeError::CallerError(_))));
        // The fourth call never reached the host.
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_host_error_propagates_with_message() {
        let rt = HostRuntime::new("feed");
        let provider = HostObject::new();
        provider.set("size", HostValue::Number(3.0));
        provider.set("feed", HostFunction::new(|_| Err(HostException::new("boom"))));
        let mut adapter = ContentFeedAdapter::new(&rt, &provider).unwrap();

        let err = rt.run_worker("engine", move || adapter.feed()).unwrap().unwrap_err();
        assert!(err.to_string().contains("boom"), "{}", err);
        assert!(err.to_string().contains(FEED_BRIDGE));
    }

    #[test]
    fn test_non_blob_reply_is_rejected() {
        let rt = HostRuntime::new("feed");
        let provider = HostObject::new();
        provider.set("size", HostValue::Number(3.0));
        provider.set("feed", HostFunction::new(|_| Ok(HostValue::from("abc"))));
        let mut adapter = ContentFeedAdapter::new(&rt, &provider).unwrap();

        let err = adapter.feed().unwrap_err();
        assert!(matches!(err, BridgeError::UnexpectedType { .. }));
        assert!(err.to_string().contains("an object of type Blob from feed()"));
    }

    #[test]
    fn test_construction_validates_size_and_feed() {
        let rt = HostRuntime::new("feed");

        let no_feed = HostObject::with_props([("size", HostValue::Number(1.0))]);
        let err = ContentFeedAdapter::new(&rt, &no_feed).err().unwrap();
        assert_eq!(
            err,
            BridgeError::Construction("ContentProvider.feed must be a function.".into())
        );

        let negative = HostObject::with_props([("size", HostValue::Number(-5.0))]);
        negative.set("feed", HostFunction::new(|_| Ok(HostValue::Undefined)));
        assert!(matches!(
            ContentFeedAdapter::new(&rt, &negative).err().unwrap(),
            BridgeError::SizeConversion(_)
        ));

        let huge = HostObject::with_props([("size", HostValue::BigInt(1 << 40))]);
        huge.set("feed", HostFunction::new(|_| Ok(HostValue::Undefined)));
        assert_eq!(ContentFeedAdapter::new(&rt, &huge).unwrap().size(), 1 << 40);
    }

    #[test]
    fn test_provider_from_host_moves_native_providers() {
        let rt = HostRuntime::new("feed");
        let config = BridgeConfig::default();
        let wrapped = crate::writer::provider::host_string_provider(&HostValue::from("abc"));

        let mut native = provider_from_host(&rt, &HostValue::Object(wrapped.clone()), &config).unwrap();
        assert_eq!(native.feed().unwrap().to_string(), "abc");
        assert!(matches!(
            provider_from_host(&rt, &HostValue::Object(wrapped), &config).err().unwrap(),
            BridgeError::ProxyReleased(_)
        ));

        let mut inline = provider_from_host(&rt, &HostValue::from("text"), &config).unwrap();
        assert_eq!(inline.size(), 4);
        assert_eq!(inline.feed().unwrap().to_string(), "text");

        assert!(matches!(
            provider_from_host(&rt, &HostValue::Number(1.0), &config).err().unwrap(),
            BridgeError::UnexpectedType { .. }
        ));
    }
}
