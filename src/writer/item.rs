// In: src/writer/item.rs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::bridge::ThreadSafeCallbackBridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::host::{HostFunction, HostObject, HostScope, HostValue};
use crate::writer::blob::Blob;
use crate::writer::feed::provider_from_host;
use crate::writer::provider::{ContentProvider, FileProvider, StringProvider};

//==================================================================================
// I. Hints & index data
//==================================================================================

/// Per-item hints for the engine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hints {
    pub compress: Option<bool>,
    pub front_article: Option<bool>,
}

impl Hints {
    /// Reads `{COMPRESS, FRONT_ARTICLE}`; absent keys stay unset.
    pub fn from_host(obj: &HostObject) -> Self {
        let flag = |key: &str| obj.has(key).then(|| obj.get(key).to_number() != 0.0);
        Self {
            compress: flag("COMPRESS"),
            front_article: flag("FRONT_ARTICLE"),
        }
    }

    pub fn from_host_value(value: &HostValue) -> Self {
        value.as_object().map(Self::from_host).unwrap_or_default()
    }

    pub fn to_host(&self) -> HostObject {
        let obj = HostObject::new();
        if let Some(compress) = self.compress {
            obj.set("COMPRESS", HostValue::Number(f64::from(u8::from(compress))));
        }
        if let Some(front) = self.front_article {
            obj.set("FRONT_ARTICLE", HostValue::Number(f64::from(u8::from(front))));
        }
        obj
    }

    /// Whether content should be compressed when the archive compresses at all.
    pub fn wants_compression(&self) -> bool {
        self.compress.unwrap_or(true)
    }

    pub fn is_front_article(&self) -> bool {
        self.front_article.unwrap_or(false)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
}

/// What the full-text indexer should know about an item.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IndexData {
    pub title: String,
    pub content: String,
    pub keywords: String,
    pub word_count: u32,
    pub position: Option<GeoPosition>,
}

impl IndexData {
    /// Parses `{hasIndexData, title, content, keywords, wordcount, position}`.
    ///
    /// `Ok(None)` when `hasIndexData` is false or nothing was provided.
    pub fn from_host(obj: &HostObject) -> Result<Option<Self>> {
        if obj.has("hasIndexData") && !obj.get("hasIndexData").to_bool() {
            return Ok(None);
        }
        let text = |key: &str| {
            if obj.has(key) {
                obj.get(key).to_display_string()
            } else {
                String::new()
            }
        };
        let word_count = if obj.has("wordcount") {
            obj.get("wordcount").to_number().max(0.0) as u32
        } else {
            0
        };
        let position = match obj.get("position") {
            HostValue::Array(parts) if parts.len() < 3 => {
                return Err(BridgeError::Construction(
                    "position must have a length of 3".to_string(),
                ))
            }
            HostValue::Array(parts) if parts[0].to_bool() => Some(GeoPosition {
                latitude: parts[1].to_number(),
                longitude: parts[2].to_number(),
            }),
            _ => None,
        };

        let data = Self {
            title: text("title"),
            content: text("content"),
            keywords: text("keywords"),
            word_count,
            position,
        };
        Ok((!data.is_empty()).then_some(data))
    }

    /// What the indexer derives on its own from a textual item: markup is
    /// stripped and the words counted.
    pub fn from_text(title: &str, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let mut content = String::with_capacity(text.len());
        let mut in_tag = false;
        for c in text.chars() {
            match c {
                '<' => in_tag = true,
                '>' if in_tag => {
                    in_tag = false;
                    content.push(' ');
                }
                _ if !in_tag => content.push(c),
                _ => {}
            }
        }
        let content = content.split_whitespace().collect::<Vec<_>>().join(" ");
        Self {
            title: title.to_string(),
            word_count: content.split(' ').filter(|w| !w.is_empty()).count() as u32,
            content,
            keywords: String::new(),
            position: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.content.is_empty()
            && self.keywords.is_empty()
            && self.word_count == 0
            && self.position.is_none()
    }
}

//==================================================================================
// II. Items
//==================================================================================

/// One entry to be written to an archive.
///
/// Every method may be called from any engine thread.
pub trait WriterItem: Send + Sync {
    fn path(&self) -> Result<String>;
    fn title(&self) -> Result<String>;
    fn mime_type(&self) -> Result<String>;

    fn hints(&self) -> Result<Hints> {
        Ok(Hints::default())
    }

    fn index_data(&self) -> Result<Option<IndexData>> {
        Ok(None)
    }

    fn content_provider(&self) -> Result<Box<dyn ContentProvider>>;
}

/// An item whose content is held in memory.
#[derive(Debug, Clone)]
pub struct StringItem {
    pub path: String,
    pub mime_type: String,
    pub title: String,
    pub hints: Hints,
    pub content: Blob,
}

impl StringItem {
    pub fn new(
        path: impl Into<String>,
        mime_type: impl Into<String>,
        title: impl Into<String>,
        hints: Hints,
        content: impl Into<Blob>,
    ) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            title: title.into(),
            hints,
            content: content.into(),
        }
    }
}

impl WriterItem for StringItem {
    fn path(&self) -> Result<String> {
        Ok(self.path.clone())
    }

    fn title(&self) -> Result<String> {
        Ok(self.title.clone())
    }

    fn mime_type(&self) -> Result<String> {
        Ok(self.mime_type.clone())
    }

    fn hints(&self) -> Result<Hints> {
        Ok(self.hints)
    }

    fn content_provider(&self) -> Result<Box<dyn ContentProvider>> {
        Ok(Box::new(StringProvider::new(self.content.clone())))
    }
}

/// An item whose content is read from a file when the engine asks for it.
#[derive(Debug, Clone)]
pub struct FileItem {
    pub path: String,
    pub mime_type: String,
    pub title: String,
    pub hints: Hints,
    pub file_path: PathBuf,
}

impl FileItem {
    pub fn new(
        path: impl Into<String>,
        mime_type: impl Into<String>,
        title: impl Into<String>,
        hints: Hints,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            title: title.into(),
            hints,
            file_path: file_path.into(),
        }
    }
}

impl WriterItem for FileItem {
    fn path(&self) -> Result<String> {
        Ok(self.path.clone())
    }

    fn title(&self) -> Result<String> {
        Ok(self.title.clone())
    }

    fn mime_type(&self) -> Result<String> {
        Ok(self.mime_type.clone())
    }

    fn hints(&self) -> Result<Hints> {
        Ok(self.hints)
    }

    fn content_provider(&self) -> Result<Box<dyn ContentProvider>> {
        Ok(Box::new(FileProvider::new(&self.file_path)?))
    }
}

//==================================================================================
// III. Host-object items
//==================================================================================

/// How one item capability is served.
enum Capability<T: Send + 'static> {
    /// Read from a plain property at construction.
    Fixed(T),
    /// A host callable, reached through a bridge on every call.
    Forwarded(ThreadSafeCallbackBridge<(), T>),
    /// Not provided; the trait default applies.
    Default,
}

impl<T: Clone + Send + 'static> Capability<T> {
    fn resolve(&self, default: impl FnOnce() -> Result<T>) -> Result<T> {
        match self {
            Capability::Fixed(value) => Ok(value.clone()),
            Capability::Forwarded(bridge) => bridge.invoke(()),
            Capability::Default => default(),
        }
    }

    fn is_forwarded(&self) -> bool {
        matches!(self, Capability::Forwarded(_))
    }
}

enum ContentSource {
    Forwarded(ThreadSafeCallbackBridge<(), Box<dyn ContentProvider>>),
    Inline(Blob),
}

/// A host item object seen as a native [`WriterItem`].
///
/// Built on the host thread. Each capability is taken from a getter
/// (`getPath()`), a callable property (`path: () => ...`) or a plain property
/// (`path: "..."`), in that order of preference. Callables are wrapped in
/// bridges so the engine can query the item from its workers.
pub struct HostItemProxy {
    path: Capability<String>,
    title: Capability<String>,
    mime_type: Capability<String>,
    hints: Capability<Hints>,
    index_data: Capability<Option<IndexData>>,
    content: ContentSource,
}

impl HostItemProxy {
    pub fn new(scope: &HostScope, item: &HostObject, config: &BridgeConfig) -> Result<Self> {
        scope.guard().ensure_host_thread("HostItemProxy::new")?;

        let text = |value: &HostValue| -> Result<String> { Ok(value.to_display_string()) };
        let path = capability(scope, item, "path", "getPath", config, text)?
            .ok_or_else(|| BridgeError::Construction("item.path is required".to_string()))?;
        let title = capability(scope, item, "title", "getTitle", config, text)?
            .unwrap_or(Capability::Fixed(String::new()));
        let mime_type = capability(scope, item, "mimeType", "getMimeType", config, text)?
            .ok_or_else(|| BridgeError::Construction("item.mimeType is required".to_string()))?;
        let hints = capability(scope, item, "hints", "getHints", config, |v| {
            Ok(Hints::from_host_value(v))
        })?
        .unwrap_or(Capability::Default);
        let index_data = capability(scope, item, "indexData", "getIndexData", config, |v| {
            match v.as_object() {
                Some(obj) => IndexData::from_host(obj),
                None if v.is_nullish() => Ok(None),
                None => Err(BridgeError::unexpected(
                    "getIndexData",
                    "an object from getIndexData",
                    v.type_name(),
                )),
            }
        })?
        .unwrap_or(Capability::Default);

        let content = match item.get("getContentProvider") {
            HostValue::Function(get_provider) => {
                let label = format!("{}.getContentProvider", config.name);
                let feed_config = BridgeConfig {
                    queue_capacity: config.queue_capacity,
                    name: format!("{}.feed", config.name),
                };
                let host = scope.clone();
                ContentSource::Forwarded(ThreadSafeCallbackBridge::new(
                    scope,
                    label.clone(),
                    config.queue_capacity,
                    move |()| {
                        let value = get_provider
                            .call(&[])
                            .map_err(|e| BridgeError::from_host(&label, e))?;
                        provider_from_host(&host, &value, &feed_config)
                    },
                ))
            }
            HostValue::Undefined if item.has("content") => {
                let content = item.get("content");
                ContentSource::Inline(match crate::writer::blob::from_host(&content) {
                    Some(blob) => blob,
                    None => match content {
                        HostValue::Bytes(bytes) => Blob::new(bytes),
                        other => Blob::from(other.to_display_string()),
                    },
                })
            }
            _ => {
                return Err(BridgeError::Construction(
                    "getContentProvider must be a function".to_string(),
                ))
            }
        };

        Ok(Self {
            path,
            title,
            mime_type,
            hints,
            index_data,
            content,
        })
    }

    /// Number of capabilities served through a bridge.
    pub fn forwarded_count(&self) -> usize {
        [
            self.path.is_forwarded(),
            self.title.is_forwarded(),
            self.mime_type.is_forwarded(),
            self.hints.is_forwarded(),
            self.index_data.is_forwarded(),
            matches!(self.content, ContentSource::Forwarded(_)),
        ]
        .iter()
        .filter(|f| **f)
        .count()
    }
}

/// Looks a capability up on `item`. `Ok(None)` when the item has neither form.
fn capability<T, F>(
    scope: &HostScope,
    item: &HostObject,
    property: &str,
    getter: &str,
    config: &BridgeConfig,
    convert: F,
) -> Result<Option<Capability<T>>>
where
    T: Send + 'static,
    F: Fn(&HostValue) -> Result<T> + Copy + 'static,
{
    let forward = |func: HostFunction, name: &str| {
        let label = format!("{}.{}", config.name, name);
        let bridge_label = label.clone();
        Capability::Forwarded(ThreadSafeCallbackBridge::new(
            scope,
            bridge_label,
            config.queue_capacity,
            move |()| {
                let value = func.call(&[]).map_err(|e| BridgeError::from_host(&label, e))?;
                convert(&value).map_err(|e| e.in_bridge(&label))
            },
        ))
    };

    if let HostValue::Function(func) = item.get(getter) {
        return Ok(Some(forward(func, getter)));
    }
    match item.get(property) {
        HostValue::Function(func) => Ok(Some(forward(func, property))),
        HostValue::Undefined => Ok(None),
        value => convert(&value).map(|v| Some(Capability::Fixed(v))),
    }
}

impl WriterItem for HostItemProxy {
    fn path(&self) -> Result<String> {
        self.path.resolve(|| Ok(String::new()))
    }

    fn title(&self) -> Result<String> {
        self.title.resolve(|| Ok(String::new()))
    }

    fn mime_type(&self) -> Result<String> {
        self.mime_type.resolve(|| Ok(String::new()))
    }

    fn hints(&self) -> Result<Hints> {
        self.hints.resolve(|| Ok(Hints::default()))
    }

    fn index_data(&self) -> Result<Option<IndexData>> {
        self.index_data.resolve(|| Ok(None))
    }

    fn content_provider(&self) -> Result<Box<dyn ContentProvider>> {
        match &self.content {
            ContentSource::Forwarded(bridge) => bridge.invoke(()),
            ContentSource::Inline(blob) => Ok(Box::new(StringProvider::new(blob.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostException, HostRuntime};
    use crate::writer::blob;
    use std::sync::Arc;

    fn config() -> BridgeConfig {
        BridgeConfig {
            queue_capacity: 0,
            name: "item".to_string(),
        }
    }

    fn drain(provider: &mut dyn ContentProvider) -> Vec<u8> {
        let mut out = Vec::new();
        while (out.len() as u64) < provider.size() {
            out.extend_from_slice(&provider.feed().unwrap());
        }
        out
    }

    #[test]
    fn test_hints_parse_and_round_trip_through_host() {
        let obj = HostObject::with_props([("COMPRESS", 0.0), ("FRONT_ARTICLE", 1.0)]);
        let hints = Hints::from_host(&obj);
        assert_eq!(hints.compress, Some(false));
        assert_eq!(hints.front_article, Some(true));
        assert_eq!(Hints::from_host(&hints.to_host()), hints);
        assert_eq!(Hints::from_host(&HostObject::new()), Hints::default());
    }

    #[test]
    fn test_index_data_parsing() {
        let obj = HostObject::with_props([
            ("title", HostValue::from("Title")),
            ("keywords", HostValue::from("a b")),
            ("wordcount", HostValue::Number(12.0)),
            (
                "position",
                HostValue::Array(vec![HostValue::Bool(true), 1.5.into(), (-2.0).into()]),
            ),
        ]);
        let data = IndexData::from_host(&obj).unwrap().unwrap();
        assert_eq!(data.word_count, 12);
        assert_eq!(
            data.position,
            Some(GeoPosition {
                latitude: 1.5,
                longitude: -2.0
            })
        );

        obj.set("position", HostValue::Array(vec![HostValue::Bool(true)]));
        assert!(matches!(
            IndexData::from_host(&obj),
            Err(BridgeError::Construction(_))
        ));

        let disabled = HostObject::with_props([("hasIndexData", false)]);
        disabled.set("title", "ignored");
        assert_eq!(IndexData::from_host(&disabled).unwrap(), None);
    }

    #[test]
    fn test_index_data_from_markup() {
        let data = IndexData::from_text("Page", b"<h1>Big</h1><p>small  words\nhere</p>");
        assert_eq!(data.content, "Big small words here");
        assert_eq!(data.word_count, 4);
        assert_eq!(data.title, "Page");
        assert_eq!(IndexData::from_text("", b"").word_count, 0);
    }

    #[test]
    fn test_plain_item_object() {
        let rt = HostRuntime::new("items");
        let item = HostObject::with_props([
            ("path", HostValue::from("A/plain")),
            ("title", HostValue::from("Plain")),
            ("mimeType", HostValue::from("text/html")),
            ("content", HostValue::from("<p>hi</p>")),
        ]);
        let proxy = HostItemProxy::new(&rt, &item, &config()).unwrap();

        assert_eq!(proxy.forwarded_count(), 0);
        assert_eq!(proxy.path().unwrap(), "A/plain");
        assert_eq!(proxy.hints().unwrap(), Hints::default());
        assert_eq!(proxy.index_data().unwrap(), None);
        assert_eq!(drain(proxy.content_provider().unwrap().as_mut()), b"<p>hi</p>");
    }

    #[test]
    fn test_item_without_content_is_rejected() {
        let rt = HostRuntime::new("items");
        let item = HostObject::with_props([("path", "A/x"), ("mimeType", "text/plain")]);
        let err = HostItemProxy::new(&rt, &item, &config()).err().unwrap();
        assert_eq!(
            err,
            BridgeError::Construction("getContentProvider must be a function".into())
        );

        let no_path = HostObject::with_props([("mimeType", "text/plain"), ("content", "x")]);
        assert!(HostItemProxy::new(&rt, &no_path, &config()).is_err());
    }

    #[test]
    fn test_forwarded_capabilities_from_worker() {
        let rt = HostRuntime::new("items");
        let item = HostObject::with_props([("mimeType", "text/plain")]);
        item.set("getPath", HostFunction::new(|_| Ok(HostValue::from("A/dyn"))));
        item.set(
            "getIndexData",
            HostFunction::new(|_| {
                Ok(HostObject::with_props([("title", "Indexed"), ("content", "body")]).into())
            }),
        );
        item.set(
            "getContentProvider",
            HostFunction::new(|_| {
                let provider = HostObject::with_props([("size", HostValue::Number(6.0))]);
                provider.set(
                    "feed",
                    HostFunction::new(|_| Ok(blob::host_blob_from_slice(b"dynami").into())),
                );
                Ok(provider.into())
            }),
        );
        let proxy = Arc::new(HostItemProxy::new(&rt, &item, &config()).unwrap());
        assert_eq!(proxy.forwarded_count(), 3);

        let remote = Arc::clone(&proxy);
        let (path, index, content) = rt
            .run_worker("engine", move || {
                let mut provider = remote.content_provider().unwrap();
                let first = provider.feed().unwrap();
                (remote.path(), remote.index_data(), first)
            })
            .unwrap();

        assert_eq!(path.unwrap(), "A/dyn");
        assert_eq!(index.unwrap().unwrap().title, "Indexed");
        assert_eq!(content.as_bytes(), b"dynami");
    }

    #[test]
    fn test_forwarded_error_names_the_capability() {
        let rt = HostRuntime::new("items");
        let item = HostObject::with_props([("path", "A/e"), ("mimeType", "text/plain")]);
        item.set(
            "getContentProvider",
            HostFunction::new(|_| Err(HostException::new("boom"))),
        );
        let proxy = Arc::new(HostItemProxy::new(&rt, &item, &config()).unwrap());

        let remote = Arc::clone(&proxy);
        let err = rt
            .run_worker("engine", move || remote.content_provider().err())
            .unwrap()
            .unwrap();
        assert!(err.to_string().contains("item.getContentProvider"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_string_item_serves_its_content() {
        let item = StringItem::new("A/s", "text/plain", "S", Hints::default(), "content");
        let mut provider = item.content_provider().unwrap();
        assert_eq!(provider.size(), 7);
        assert_eq!(drain(provider.as_mut()), b"content");
    }
}
