// In: src/module.rs

//! What the scripting host sees.
//!
//! A [`ModuleContext`] is created once per module instance on the host thread.
//! It owns the proxy registry shared by everything the module hands out:
//! blob and provider constructors, native item wrappers, [`HostCreator`] and
//! [`HostArchive`].

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Compression, CreatorConfig};
use crate::error::{BridgeError, Result};
use crate::host::{HostException, HostFunction, HostObject, HostScope, HostValue};
use crate::proxy::ProxyRegistry;
use crate::reader::{
    Archive, Entry, EntryRange, Item, Query, Search, Searcher, SuggestionSearch,
    SuggestionSearcher,
};
use crate::writer::blob;
use crate::writer::feed::provider_from_host;
use crate::writer::item::{FileItem, Hints, HostItemProxy, StringItem, WriterItem};
use crate::writer::provider::{
    self, provider_to_host, ContentProvider, FILE_PROVIDER_CLASS, STRING_PROVIDER_CLASS,
};
use crate::writer::Creator;

pub const STRING_ITEM_CLASS: &str = "StringItem";
pub const FILE_ITEM_CLASS: &str = "FileItem";
pub const ENTRY_CLASS: &str = "Entry";
pub const ITEM_CLASS: &str = "Item";
pub const SEARCH_RESULT_CLASS: &str = "SearchIterator";
pub const SUGGESTION_CLASS: &str = "SuggestionItem";

/// Internal slot of a host object wrapping a native item.
struct NativeItem(Arc<dyn WriterItem>);

//==================================================================================
// I. Module context
//==================================================================================

pub struct ModuleContext {
    scope: HostScope,
    registry: ProxyRegistry,
}

impl ModuleContext {
    pub fn init(scope: &HostScope) -> Result<Self> {
        scope.guard().ensure_host_thread("ModuleContext::init")?;
        log::debug!("[{}] module context initialised", scope.name());
        Ok(Self {
            scope: scope.clone(),
            registry: ProxyRegistry::new(scope),
        })
    }

    pub fn scope(&self) -> &HostScope {
        &self.scope
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    /// Releases every registered view. Host objects created earlier stay
    /// alive but no longer resolve to native values.
    pub fn teardown(&self) {
        self.registry.clear();
    }

    // --- Constructors exposed to the host ---

    pub fn new_blob(&self, content: &HostValue) -> HostObject {
        blob::host_blob_from_value(content)
    }

    pub fn new_string_provider(&self, content: &HostValue) -> HostObject {
        provider::host_string_provider(content)
    }

    pub fn new_file_provider(&self, path: &HostValue) -> Result<HostObject> {
        provider::host_file_provider(path)
    }

    pub fn new_string_item(
        &self,
        path: &str,
        mime_type: &str,
        title: &str,
        hints: &HostValue,
        content: &HostValue,
    ) -> Result<HostObject> {
        let content = blob::from_host(content).unwrap_or_else(|| match content {
            HostValue::Bytes(bytes) => bytes.as_slice().into(),
            other => other.to_display_string().into(),
        });
        let item = StringItem::new(path, mime_type, title, Hints::from_host_value(hints), content);
        native_item_to_host(STRING_ITEM_CLASS, STRING_PROVIDER_CLASS, Arc::new(item))
    }

    pub fn new_file_item(
        &self,
        path: &str,
        mime_type: &str,
        title: &str,
        hints: &HostValue,
        file_path: &str,
    ) -> Result<HostObject> {
        let item = FileItem::new(path, mime_type, title, Hints::from_host_value(hints), file_path);
        native_item_to_host(FILE_ITEM_CLASS, FILE_PROVIDER_CLASS, Arc::new(item))
    }

    pub fn new_creator(&self) -> HostCreator {
        self.new_creator_with(CreatorConfig::default())
    }

    pub fn new_creator_with(&self, config: CreatorConfig) -> HostCreator {
        HostCreator {
            scope: self.scope.clone(),
            registry: self.registry.clone(),
            creator: Arc::new(Creator::with_config(config)),
        }
    }

    pub fn open_archive(&self, path: &str) -> Result<HostArchive> {
        Ok(HostArchive::new(self, Archive::open(path)?))
    }

    /// A full-text searcher over one or more archives.
    pub fn new_searcher(&self, archives: &[&HostArchive]) -> Result<HostSearcher> {
        let searcher = Searcher::from_archives(
            archives.iter().map(|a| Arc::clone(&a.archive)).collect(),
        )?;
        Ok(HostSearcher {
            registry: self.registry.clone(),
            searcher,
        })
    }

    pub fn new_suggestion_searcher(&self, archive: &HostArchive) -> HostSuggestionSearcher {
        HostSuggestionSearcher {
            registry: self.registry.clone(),
            searcher: SuggestionSearcher::new(Arc::clone(&archive.archive)),
        }
    }
}

impl Drop for ModuleContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn native_item_to_host(
    class: &'static str,
    provider_class: &'static str,
    item: Arc<dyn WriterItem>,
) -> Result<HostObject> {
    let obj = HostObject::with_class(class);
    obj.set("path", item.path()?);
    obj.set("title", item.title()?);
    obj.set("mimeType", item.mime_type()?);
    obj.set("hints", item.hints()?.to_host());

    let native = Arc::clone(&item);
    obj.set(
        "getContentProvider",
        HostFunction::new(move |_| {
            let provider = native
                .content_provider()
                .map_err(|e| HostException::new(e.to_string()))?;
            Ok(provider_to_host(provider_class, provider).into())
        }),
    );
    obj.set_internal(NativeItem(item));
    Ok(obj)
}

//==================================================================================
// II. Creator
//==================================================================================

/// The host-facing `Creator`.
///
/// Every call that may reach back into host code (items, feed-based
/// providers, finishing) runs the engine on a worker while this thread keeps
/// servicing bridge calls.
pub struct HostCreator {
    scope: HostScope,
    registry: ProxyRegistry,
    creator: Arc<Creator>,
}

impl HostCreator {
    pub fn creator(&self) -> &Arc<Creator> {
        &self.creator
    }

    pub fn config_verbose(&self, verbose: &HostValue) -> Result<&Self> {
        self.creator.config_verbose(verbose.to_bool())?;
        Ok(self)
    }

    pub fn config_compression(&self, compression: &HostValue) -> Result<&Self> {
        let name = compression.to_display_string();
        let compression = Compression::from_name(&name).ok_or_else(|| {
            BridgeError::CallerError(format!("unknown compression '{}'", name))
        })?;
        self.creator.config_compression(compression)?;
        Ok(self)
    }

    pub fn config_cluster_size(&self, size: &HostValue) -> Result<&Self> {
        self.creator.config_cluster_size(size.to_u64_lossless()?)?;
        Ok(self)
    }

    pub fn config_indexing(&self, enabled: &HostValue, language: &HostValue) -> Result<&Self> {
        self.creator
            .config_indexing(enabled.to_bool(), &language.to_display_string())?;
        Ok(self)
    }

    pub fn config_nb_workers(&self, workers: &HostValue) -> Result<&Self> {
        let workers = usize::try_from(workers.to_u64_lossless()?)
            .map_err(|e| BridgeError::SizeConversion(e.to_string()))?;
        self.creator.config_nb_workers(workers)?;
        Ok(self)
    }

    pub fn start_zim_creation(&self, path: &HostValue) -> Result<()> {
        let path = (!path.is_nullish()).then(|| PathBuf::from(path.to_display_string()));
        self.creator.start_zim_creation(path)
    }

    pub fn add_item(&self, item: &HostValue) -> Result<()> {
        let obj = item.as_object().ok_or_else(|| {
            BridgeError::unexpected("Creator.addItem", "an item object", item.type_name())
        })?;

        let native = obj.internal::<NativeItem>().map(|n| Arc::clone(&n.0));
        if let Some(native) = native {
            return self.creator.add_item(native);
        }

        let config = self.creator.config().bridge_config("item");
        let scope = self.scope.clone();
        let proxy = self
            .registry
            .proxy_for(obj, |obj| HostItemProxy::new(&scope, obj, &config))?;
        let creator = Arc::clone(&self.creator);
        self.scope
            .run_worker("zim-add-item", move || creator.add_item(proxy))?
    }

    pub fn add_metadata(
        &self,
        name: &str,
        content: &HostValue,
        mime_type: Option<&str>,
    ) -> Result<()> {
        if let HostValue::String(text) = content {
            return self.creator.add_metadata_str(name, text, mime_type);
        }
        let provider = self.content_provider(content, "metadata")?;
        self.creator.add_metadata(name, provider, mime_type)
    }

    pub fn add_illustration(&self, size: &HostValue, content: &HostValue) -> Result<()> {
        let size = u32::try_from(size.to_u64_lossless()?)
            .map_err(|e| BridgeError::SizeConversion(e.to_string()))?;
        let provider = self.content_provider(content, "illustration")?;
        self.creator.add_illustration(size, provider)
    }

    pub fn add_redirection(
        &self,
        path: &str,
        title: &str,
        target: &str,
        hints: &HostValue,
    ) -> Result<()> {
        self.creator
            .add_redirection(path, title, target, Hints::from_host_value(hints))
    }

    pub fn set_main_path(&self, path: &str) -> Result<()> {
        self.creator.set_main_path(path)
    }

    pub fn set_uuid(&self, uuid: &HostValue) -> Result<()> {
        match uuid {
            HostValue::Bytes(bytes) => self.creator.set_uuid(bytes),
            other => Err(BridgeError::unexpected(
                "Creator.setUuid",
                "a 16-byte buffer",
                other.type_name(),
            )),
        }
    }

    pub fn finish_zim_creation(&self) -> Result<HostArchive> {
        let creator = Arc::clone(&self.creator);
        let archive = self
            .scope
            .run_worker("zim-finish", move || creator.finish_zim_creation())??;
        Ok(HostArchive {
            registry: self.registry.clone(),
            archive: Arc::new(archive),
        })
    }

    fn content_provider(&self, content: &HostValue, what: &str) -> Result<Box<dyn ContentProvider>> {
        let config = self.creator.config().bridge_config(what);
        provider_from_host(&self.scope, content, &config).map_err(|e| match e {
            BridgeError::ProxyReleased(class) => BridgeError::CallerError(format!(
                "{} has been moved and is no longer valid",
                class
            )),
            other => other,
        })
    }
}

//==================================================================================
// III. Archive
//==================================================================================

/// The host-facing `Archive`. Entries and items are handed out through the
/// registry, so asking for the same one twice yields the same host object.
#[derive(Clone)]
pub struct HostArchive {
    registry: ProxyRegistry,
    archive: Arc<Archive>,
}

impl HostArchive {
    pub fn new(module: &ModuleContext, archive: Archive) -> Self {
        Self {
            registry: module.registry.clone(),
            archive: Arc::new(archive),
        }
    }

    pub fn archive(&self) -> &Arc<Archive> {
        &self.archive
    }

    pub fn entry_count(&self) -> usize {
        self.archive.entry_count()
    }

    pub fn entry_by_path(&self, path: &str) -> Result<HostObject> {
        self.entry_view(&self.archive.get_entry_by_path(path)?)
    }

    pub fn entry_by_title(&self, title: &str) -> Result<HostObject> {
        self.entry_view(&self.archive.get_entry_by_title(title)?)
    }

    pub fn main_entry(&self) -> Result<HostObject> {
        self.entry_view(&self.archive.main_entry()?)
    }

    /// The item behind a host entry object.
    pub fn item_of(&self, entry: &HostObject, follow_redirect: bool) -> Result<HostObject> {
        let entry: Arc<Entry> = self.registry.native_view_of(entry)?;
        let item = self.archive.get_item(&entry, follow_redirect)?;
        self.registry.host_view_of(&item, |item| Ok(item_to_host(item)))
    }

    pub fn random_entry(&self) -> Result<HostObject> {
        self.entry_view(&self.archive.get_random_entry()?)
    }

    pub fn has_title_index(&self) -> bool {
        self.archive.has_title_index()
    }

    pub fn has_fulltext_index(&self) -> bool {
        self.archive.has_fulltext_index()
    }

    pub fn iter_by_path(&self) -> HostEntryRange {
        self.range(self.archive.iter_by_path())
    }

    pub fn iter_by_title(&self) -> HostEntryRange {
        self.range(self.archive.iter_by_title())
    }

    pub fn iter_efficient(&self) -> HostEntryRange {
        self.range(self.archive.iter_efficient())
    }

    pub fn find_by_path(&self, prefix: &HostValue) -> Result<HostEntryRange> {
        Ok(self.range(self.archive.find_by_path(&expect_string("Archive.findByPath", prefix)?)))
    }

    pub fn find_by_title(&self, prefix: &HostValue) -> Result<HostEntryRange> {
        Ok(self.range(self.archive.find_by_title(&expect_string("Archive.findByTitle", prefix)?)))
    }

    pub fn metadata(&self, name: &str) -> Result<String> {
        self.archive.get_metadata(name)
    }

    pub fn illustration(&self, size: u32) -> Result<HostObject> {
        let item = self.archive.get_illustration_item(size)?;
        self.registry.host_view_of(&item, |item| Ok(item_to_host(item)))
    }

    fn entry_view(&self, entry: &Arc<Entry>) -> Result<HostObject> {
        entry_view(&self.registry, entry)
    }

    fn range(&self, range: EntryRange) -> HostEntryRange {
        HostEntryRange {
            registry: self.registry.clone(),
            range,
        }
    }
}

fn entry_view(registry: &ProxyRegistry, entry: &Arc<Entry>) -> Result<HostObject> {
    registry.host_view_of(entry, |entry| {
        let obj = HostObject::with_class(ENTRY_CLASS);
        obj.set("path", entry.path());
        obj.set("title", entry.title());
        obj.set("isRedirect", entry.is_redirect());
        obj.set("index", entry.index());
        Ok(obj)
    })
}

fn expect_string(call: &str, value: &HostValue) -> Result<String> {
    match value {
        HostValue::String(s) => Ok(s.clone()),
        other => Err(BridgeError::unexpected(call, "a string", other.type_name())),
    }
}

/// `start` and `maxResults` of the paging calls.
fn window(call: &str, start: &HostValue, max_results: &HostValue) -> Result<(usize, usize)> {
    let index = |v: &HostValue| -> Result<usize> {
        match v {
            HostValue::Number(_) | HostValue::BigInt(_) => usize::try_from(v.to_u64_lossless()?)
                .map_err(|e| BridgeError::SizeConversion(e.to_string())),
            other => Err(BridgeError::unexpected(call, "a number", other.type_name())),
        }
    };
    Ok((index(start)?, index(max_results)?))
}

/// An ordered run of entries, seen from the host.
pub struct HostEntryRange {
    registry: ProxyRegistry,
    range: EntryRange,
}

impl HostEntryRange {
    pub fn size(&self) -> usize {
        self.range.size()
    }

    pub fn offset(&self, start: &HostValue, max_results: &HostValue) -> Result<HostEntryRange> {
        let (start, max_results) = window("EntryRange.offset", start, max_results)?;
        Ok(HostEntryRange {
            registry: self.registry.clone(),
            range: self.range.offset(start, max_results),
        })
    }

    /// The registered entry views, in range order.
    pub fn entries(&self) -> Result<Vec<HostObject>> {
        self.range
            .iter()
            .map(|entry| entry_view(&self.registry, entry))
            .collect()
    }
}

//==================================================================================
// IV. Search
//==================================================================================

/// Accepts a plain string or `{query, georange: {latitude, longitude, distance}}`.
pub fn query_from_host(value: &HostValue) -> Result<Query> {
    const GEORANGE: &str =
        "georange must be an object containing latitude, longitude, and distance";
    match value {
        HostValue::String(text) => Ok(Query::new(text.as_str())),
        HostValue::Object(obj) => {
            let mut query = Query::new(expect_string("Query", &obj.get("query"))?);
            match obj.get("georange") {
                HostValue::Undefined | HostValue::Null => {}
                HostValue::Object(range)
                    if ["latitude", "longitude", "distance"].iter().all(|k| range.has(k)) =>
                {
                    query.set_georange(
                        range.get("latitude").to_number(),
                        range.get("longitude").to_number(),
                        range.get("distance").to_number(),
                    );
                }
                _ => return Err(BridgeError::CallerError(GEORANGE.to_string())),
            }
            Ok(query)
        }
        other => Err(BridgeError::unexpected(
            "Searcher.search",
            "a query or string",
            other.type_name(),
        )),
    }
}

pub struct HostSearcher {
    registry: ProxyRegistry,
    searcher: Searcher,
}

impl HostSearcher {
    pub fn add_archive(&mut self, archive: &HostArchive) -> &mut Self {
        self.searcher.add_archive(Arc::clone(&archive.archive));
        self
    }

    pub fn set_verbose(&mut self, verbose: &HostValue) -> &mut Self {
        self.searcher.set_verbose(verbose.to_bool());
        self
    }

    pub fn search(&self, query: &HostValue) -> Result<HostSearch> {
        Ok(HostSearch {
            registry: self.registry.clone(),
            search: self.searcher.search(&query_from_host(query)?)?,
        })
    }
}

pub struct HostSearch {
    registry: ProxyRegistry,
    search: Search,
}

impl HostSearch {
    pub fn estimated_matches(&self) -> usize {
        self.search.get_estimated_matches()
    }

    pub fn get_results(&self, start: &HostValue, max_results: &HostValue) -> Result<Vec<HostObject>> {
        let (start, max_results) = window("Search.getResults", start, max_results)?;
        self.search
            .get_results(start, max_results)
            .iter()
            .map(|hit| -> Result<HostObject> {
                let obj = HostObject::with_class(SEARCH_RESULT_CLASS);
                obj.set("path", hit.path());
                obj.set("title", hit.title());
                obj.set("score", hit.score());
                obj.set("snippet", hit.snippet());
                obj.set("wordCount", hit.word_count());
                obj.set("fileIndex", hit.file_index());
                obj.set("zimId", hit.zim_id());
                obj.set("entry", entry_view(&self.registry, hit.entry())?);
                Ok(obj)
            })
            .collect()
    }
}

pub struct HostSuggestionSearcher {
    registry: ProxyRegistry,
    searcher: SuggestionSearcher,
}

impl HostSuggestionSearcher {
    pub fn set_verbose(&mut self, verbose: &HostValue) -> &mut Self {
        self.searcher.set_verbose(verbose.to_bool());
        self
    }

    pub fn suggest(&self, text: &HostValue) -> Result<HostSuggestionSearch> {
        let text = expect_string("SuggestionSearcher.suggest", text)?;
        Ok(HostSuggestionSearch {
            registry: self.registry.clone(),
            search: self.searcher.suggest(&text),
        })
    }
}

pub struct HostSuggestionSearch {
    registry: ProxyRegistry,
    search: SuggestionSearch,
}

impl HostSuggestionSearch {
    pub fn estimated_matches(&self) -> usize {
        self.search.get_estimated_matches()
    }

    pub fn get_results(&self, start: &HostValue, max_results: &HostValue) -> Result<Vec<HostObject>> {
        let (start, max_results) = window("SuggestionSearch.getResults", start, max_results)?;
        self.search
            .get_results(start, max_results)
            .iter()
            .map(|hit| -> Result<HostObject> {
                let obj = HostObject::with_class(SUGGESTION_CLASS);
                obj.set("path", hit.path());
                obj.set("title", hit.title());
                obj.set("snippet", hit.snippet());
                obj.set("hasSnippet", hit.has_snippet());
                obj.set("entry", entry_view(&self.registry, hit.entry())?);
                Ok(obj)
            })
            .collect()
    }
}

fn item_to_host(item: &Arc<Item>) -> HostObject {
    let obj = HostObject::with_class(ITEM_CLASS);
    obj.set("path", item.path());
    obj.set("title", item.title());
    obj.set("mimeType", item.mime_type());
    obj.set("size", HostValue::Number(item.size() as f64));
    obj.set("data", blob::to_host(&item.data()));
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRuntime;
    use std::cell::Cell;
    use std::rc::Rc;

    /// A host item whose content is fed in `chunk`-byte pieces.
    fn host_item(path: &str, body: &'static str, chunk: usize) -> HostObject {
        let item = HostObject::with_props([
            ("path", HostValue::from(path)),
            ("title", HostValue::from(path.to_uppercase())),
            ("mimeType", HostValue::from("text/html")),
        ]);
        item.set(
            "getContentProvider",
            HostFunction::new(move |_| {
                let offset = Rc::new(Cell::new(0usize));
                let provider = HostObject::with_props([("size", HostValue::Number(body.len() as f64))]);
                provider.set(
                    "feed",
                    HostFunction::new(move |_| {
                        let start = offset.get();
                        let end = (start + chunk).min(body.len());
                        offset.set(end);
                        Ok(blob::host_blob_from_slice(&body.as_bytes()[start..end]).into())
                    }),
                );
                Ok(provider.into())
            }),
        );
        item
    }

    #[test]
    fn test_host_items_are_fed_from_engine_workers() {
        let rt = HostRuntime::new("module");
        let module = ModuleContext::init(&rt).unwrap();
        let creator = module.new_creator();
        creator.config_nb_workers(&HostValue::Number(3.0)).unwrap();
        creator.config_compression(&HostValue::from("none")).unwrap();
        creator.start_zim_creation(&HostValue::Null).unwrap();

        for i in 0..6 {
            let item = host_item(&format!("A/{}", i), "<p>a fairly long body</p>", 5);
            creator.add_item(&HostValue::Object(item)).unwrap();
        }
        let native = module
            .new_string_item(
                "A/native",
                "text/plain",
                "Native",
                &HostValue::Undefined,
                &HostValue::from("native body"),
            )
            .unwrap();
        creator.add_item(&HostValue::Object(native)).unwrap();

        let feed = HostObject::with_props([("size", HostValue::Number(2.0))]);
        feed.set("feed", HostFunction::new(|_| Ok(blob::host_blob_from_slice(b"en").into())));
        creator.add_metadata("Language", &HostValue::Object(feed), None).unwrap();
        creator.add_metadata("Title", &HostValue::from("Test"), None).unwrap();
        creator.set_main_path("A/0").unwrap();

        let archive = creator.finish_zim_creation().unwrap();
        assert_eq!(archive.entry_count(), 7);
        assert_eq!(archive.metadata("Language").unwrap(), "en");
        assert_eq!(archive.metadata("Title").unwrap(), "Test");

        let entry = archive.entry_by_path("A/4").unwrap();
        assert_eq!(entry.get("title").to_display_string(), "A/4");
        let item = archive.item_of(&entry, false).unwrap();
        assert_eq!(
            item.get("data").to_display_string(),
            "<p>a fairly long body</p>"
        );
        let main = archive.main_entry().unwrap();
        assert_eq!(main.get("path").to_display_string(), "A/0");
    }

    #[test]
    fn test_archive_views_keep_identity() {
        let rt = HostRuntime::new("module");
        let module = ModuleContext::init(&rt).unwrap();
        let creator = module.new_creator();
        creator.start_zim_creation(&HostValue::Undefined).unwrap();
        let item = module
            .new_string_item("A/x", "text/plain", "X", &HostValue::Undefined, &HostValue::from("x"))
            .unwrap();
        creator.add_item(&HostValue::Object(item)).unwrap();
        let archive = creator.finish_zim_creation().unwrap();

        let first = archive.entry_by_path("A/x").unwrap();
        let second = archive.entry_by_title("X").unwrap();
        assert!(HostObject::ptr_eq(&first, &second));

        let a = archive.item_of(&first, true).unwrap();
        let b = archive.item_of(&second, true).unwrap();
        assert!(HostObject::ptr_eq(&a, &b));
        assert_eq!(module.registry().len(), 2);

        drop((a, b));
        assert_eq!(module.registry().len(), 1);

        module.teardown();
        assert!(matches!(
            archive.item_of(&first, true),
            Err(BridgeError::ProxyReleased(_))
        ));
    }

    fn indexed_archive(module: &ModuleContext) -> HostArchive {
        let creator = module.new_creator();
        creator
            .config_indexing(&HostValue::Bool(true), &HostValue::from("eng"))
            .unwrap();
        creator.start_zim_creation(&HostValue::Undefined).unwrap();
        for (path, title, body) in [
            ("A/apple", "Apple pie", "<p>Bake the apple slices slowly</p>"),
            ("A/banana", "Banana bread", "<p>Mash the banana, then bake</p>"),
            ("A/cherry", "Cherry jam", "<p>Boil cherries with sugar</p>"),
        ] {
            let item = module
                .new_string_item(path, "text/html", title, &HostValue::Undefined, &HostValue::from(body))
                .unwrap();
            creator.add_item(&HostValue::Object(item)).unwrap();
        }
        creator.finish_zim_creation().unwrap()
    }

    #[test]
    fn test_ranges_yield_registered_entry_views() {
        let rt = HostRuntime::new("module");
        let module = ModuleContext::init(&rt).unwrap();
        let archive = indexed_archive(&module);
        assert!(archive.has_title_index());
        assert!(archive.has_fulltext_index());

        let by_title = archive.iter_by_title();
        assert_eq!(by_title.size(), 3);
        let entries = by_title.entries().unwrap();
        let titles: Vec<String> = entries.iter().map(|e| e.get("title").to_display_string()).collect();
        assert_eq!(titles, ["Apple pie", "Banana bread", "Cherry jam"]);
        assert!(HostObject::ptr_eq(&entries[1], &archive.entry_by_path("A/banana").unwrap()));

        let page = archive
            .iter_by_path()
            .offset(&HostValue::Number(1.0), &HostValue::Number(1.0))
            .unwrap();
        assert_eq!(page.entries().unwrap()[0].get("path").to_display_string(), "A/banana");
        assert!(archive.iter_efficient().offset(&HostValue::from("1"), &HostValue::Number(1.0)).is_err());

        assert_eq!(archive.find_by_path(&HostValue::from("A/c")).unwrap().size(), 1);
        assert_eq!(archive.find_by_title(&HostValue::from("B")).unwrap().size(), 1);
        assert!(matches!(
            archive.find_by_title(&HostValue::Number(1.0)),
            Err(BridgeError::UnexpectedType { .. })
        ));

        let random = archive.random_entry().unwrap();
        assert!(archive.item_of(&random, false).is_ok());
    }

    #[test]
    fn test_search_and_suggestions_from_the_host() {
        let rt = HostRuntime::new("module");
        let module = ModuleContext::init(&rt).unwrap();
        let archive = indexed_archive(&module);

        let searcher = module.new_searcher(&[&archive]).unwrap();
        let search = searcher.search(&HostValue::from("bake")).unwrap();
        assert_eq!(search.estimated_matches(), 2);
        let hits = search
            .get_results(&HostValue::Number(0.0), &HostValue::Number(10.0))
            .unwrap();
        let paths: Vec<String> = hits.iter().map(|h| h.get("path").to_display_string()).collect();
        assert_eq!(paths, ["A/apple", "A/banana"]);
        let entry = hits[0].get("entry");
        assert!(HostObject::ptr_eq(
            entry.as_object().unwrap(),
            &archive.entry_by_path("A/apple").unwrap()
        ));
        assert!(search.get_results(&HostValue::Null, &HostValue::Number(1.0)).is_err());

        let query = HostObject::with_props([("query", HostValue::from("sugar"))]);
        query.set("georange", HostObject::with_props([("latitude", 1.0)]));
        assert!(matches!(
            searcher.search(&HostValue::Object(query)),
            Err(BridgeError::CallerError(_))
        ));
        assert!(module.new_searcher(&[]).is_err());

        let suggester = module.new_suggestion_searcher(&archive);
        let suggestions = suggester.suggest(&HostValue::from("bre")).unwrap();
        assert_eq!(suggestions.estimated_matches(), 1);
        let first = suggestions
            .get_results(&HostValue::Number(0.0), &HostValue::Number(5.0))
            .unwrap()
            .remove(0);
        assert_eq!(first.get("snippet").to_display_string(), "Banana <b>bread</b>");
        assert!(first.get("hasSnippet").to_bool());
    }

    #[test]
    fn test_native_item_field_errors_are_reported() {
        struct Broken;
        impl WriterItem for Broken {
            fn path(&self) -> Result<String> {
                Err(BridgeError::Engine("path unavailable".into()))
            }
            fn title(&self) -> Result<String> {
                Ok(String::new())
            }
            fn mime_type(&self) -> Result<String> {
                Ok("text/plain".into())
            }
            fn content_provider(&self) -> Result<Box<dyn ContentProvider>> {
                Ok(Box::new(provider::StringProvider::new("")))
            }
        }

        let err = native_item_to_host(STRING_ITEM_CLASS, STRING_PROVIDER_CLASS, Arc::new(Broken))
            .unwrap_err();
        assert_eq!(err, BridgeError::Engine("path unavailable".into()));
    }

    #[test]
    fn test_moved_provider_is_rejected() {
        let rt = HostRuntime::new("module");
        let module = ModuleContext::init(&rt).unwrap();
        let creator = module.new_creator();
        creator.start_zim_creation(&HostValue::Undefined).unwrap();

        let provider = HostValue::Object(module.new_string_provider(&HostValue::from("once")));
        creator.add_metadata("Description", &provider, None).unwrap();
        let err = creator.add_metadata("Other", &provider, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Caller error: StringProvider has been moved and is no longer valid"
        );

        let feed = provider.as_object().unwrap().get("feed");
        let raised = feed.as_function().unwrap().call(&[]).unwrap_err();
        assert!(raised.message.contains("moved and is no longer valid"));
    }

    #[test]
    fn test_creator_rejects_non_objects_and_bad_config() {
        let rt = HostRuntime::new("module");
        let module = ModuleContext::init(&rt).unwrap();
        let creator = module.new_creator();
        assert!(creator.config_compression(&HostValue::from("lzma")).is_err());
        assert!(creator.config_nb_workers(&HostValue::Number(-1.0)).is_err());
        creator.start_zim_creation(&HostValue::Undefined).unwrap();
        assert!(matches!(
            creator.add_item(&HostValue::from("not an item")),
            Err(BridgeError::UnexpectedType { .. })
        ));
        assert!(creator.set_uuid(&HostValue::Bytes(vec![0; 4])).is_err());
    }
}
