// In: src/reader/mod.rs

//! Read access to a finished archive.
//!
//! Entries and items are handed out as `Arc`s and stay the same allocation for
//! the life of the [`Archive`], so their address can identify them.

pub mod image;
pub mod range;
pub mod search;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use rand::Rng;

use crate::error::{BridgeError, Result};
use crate::writer::blob::Blob;
use crate::writer::item::{Hints, IndexData};
use self::image::{ArchiveImage, EntryRecord};
pub use self::range::EntryRange;
pub use self::search::{
    GeoRange, Query, Search, SearchResult, SearchResultSet, Searcher, SuggestionItem,
    SuggestionResultSet, SuggestionSearch, SuggestionSearcher,
};

/// Metadata key prefix under which illustrations are stored.
const ILLUSTRATION_PREFIX: &str = "Illustration_";

pub fn illustration_key(size: u32) -> String {
    format!("{}{}x{}@1", ILLUSTRATION_PREFIX, size, size)
}

fn parse_illustration_key(key: &str) -> Option<u32> {
    let dims = key.strip_prefix(ILLUSTRATION_PREFIX)?.strip_suffix("@1")?;
    let (w, h) = dims.split_once('x')?;
    (w == h).then(|| w.parse().ok()).flatten()
}

//==================================================================================
// I. Items & entries
//==================================================================================

pub struct Item {
    path: String,
    title: String,
    mime_type: String,
    hints: Hints,
    data: Blob,
    index_data: Option<IndexData>,
}

impl Item {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn hints(&self) -> Hints {
        self.hints
    }

    pub fn size(&self) -> u64 {
        self.data.size()
    }

    pub fn data(&self) -> Blob {
        self.data.clone()
    }

    /// Up to `limit` bytes starting at `offset`.
    pub fn get_data(&self, offset: u64, limit: u64) -> Blob {
        self.data.slice(offset, limit)
    }

    pub fn index_data(&self) -> Option<&IndexData> {
        self.index_data.as_ref()
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("path", &self.path)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish()
    }
}

#[derive(Debug)]
enum EntryTarget {
    Item(Arc<Item>),
    Redirect(String),
}

#[derive(Debug)]
pub struct Entry {
    index: u32,
    path: String,
    title: String,
    target: EntryTarget,
}

impl Entry {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The entry title, falling back to its path when none was given.
    pub fn title(&self) -> &str {
        if self.title.is_empty() {
            &self.path
        } else {
            &self.title
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.target, EntryTarget::Redirect(_))
    }

    pub fn redirect_target(&self) -> Option<&str> {
        match &self.target {
            EntryTarget::Redirect(target) => Some(target),
            EntryTarget::Item(_) => None,
        }
    }

    /// The item of a non-redirect entry.
    pub fn item(&self) -> Option<Arc<Item>> {
        match &self.target {
            EntryTarget::Item(item) => Some(Arc::clone(item)),
            EntryTarget::Redirect(_) => None,
        }
    }
}

//==================================================================================
// II. Archive
//==================================================================================

pub struct Archive {
    filename: Option<PathBuf>,
    image_uuid: [u8; 16],
    main_path: Option<String>,
    fulltext_language: Option<String>,
    entries: Vec<Arc<Entry>>,
    by_path: HashMap<String, usize>,
    by_title: BTreeMap<String, usize>,
    path_order: Vec<usize>,
    title_order: Vec<usize>,
    metadata: BTreeMap<String, Arc<Item>>,
}

impl Archive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = ArchiveImage::load(path)?;
        let mut archive = Self::from_image(image)?;
        archive.filename = Some(path.to_path_buf());
        log::info!(
            "opened archive {} ({} entries)",
            path.display(),
            archive.entry_count()
        );
        Ok(archive)
    }

    pub fn from_image(image: ArchiveImage) -> Result<Self> {
        let mut entries = Vec::with_capacity(image.entries.len());
        let mut by_path = HashMap::with_capacity(image.entries.len());
        let mut by_title = BTreeMap::new();

        for (index, record) in image.entries.into_iter().enumerate() {
            let entry = match record {
                EntryRecord::Item {
                    path,
                    title,
                    mime_type,
                    hints,
                    compressed,
                    size,
                    data,
                    index_data,
                } => {
                    let data = if compressed {
                        zstd::decode_all(data.as_slice())?
                    } else {
                        data
                    };
                    if data.len() as u64 != size {
                        return Err(BridgeError::Engine(format!(
                            "{}: stored {} bytes but {} were declared",
                            path,
                            data.len(),
                            size
                        )));
                    }
                    let item = Item {
                        path: path.clone(),
                        title: title.clone(),
                        mime_type,
                        hints,
                        data: Blob::new(data),
                        index_data,
                    };
                    Entry {
                        index: index as u32,
                        path,
                        title,
                        target: EntryTarget::Item(Arc::new(item)),
                    }
                }
                EntryRecord::Redirect {
                    path,
                    title,
                    target,
                    ..
                } => Entry {
                    index: index as u32,
                    path,
                    title,
                    target: EntryTarget::Redirect(target),
                },
            };
            by_path.insert(entry.path.clone(), index);
            by_title.entry(entry.title().to_string()).or_insert(index);
            entries.push(Arc::new(entry));
        }

        let metadata = image
            .metadata
            .into_iter()
            .map(|(name, record)| {
                let item = Item {
                    path: name.clone(),
                    title: name.clone(),
                    mime_type: record.mime_type,
                    hints: Hints::default(),
                    data: Blob::new(record.data),
                    index_data: None,
                };
                (name, Arc::new(item))
            })
            .collect();

        let mut path_order: Vec<usize> = (0..entries.len()).collect();
        path_order.sort_by(|&a, &b| entries[a].path().cmp(entries[b].path()));
        let mut title_order = path_order.clone();
        title_order.sort_by(|&a, &b| entries[a].title().cmp(entries[b].title()));

        Ok(Self {
            filename: None,
            image_uuid: image.uuid,
            main_path: image.main_path,
            fulltext_language: image.fulltext_language,
            entries,
            by_path,
            by_title,
            path_order,
            title_order,
            metadata,
        })
    }

    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn uuid(&self) -> [u8; 16] {
        self.image_uuid
    }

    /// The UUID in its usual hyphenated hex form.
    pub fn uuid_string(&self) -> String {
        let hex: String = self.image_uuid.iter().map(|b| format!("{:02x}", b)).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }

    pub fn get_metadata(&self, name: &str) -> Result<String> {
        self.get_metadata_item(name).map(|item| item.data().to_string())
    }

    pub fn get_metadata_item(&self, name: &str) -> Result<Arc<Item>> {
        self.metadata
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("metadata {}", name)))
    }

    /// Metadata names, illustrations excluded.
    pub fn metadata_keys(&self) -> Vec<String> {
        self.metadata
            .keys()
            .filter(|k| !k.starts_with(ILLUSTRATION_PREFIX))
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<Entry>> {
        self.entries.iter()
    }

    pub fn get_entry_by_index(&self, index: u32) -> Result<Arc<Entry>> {
        self.entries
            .get(index as usize)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("entry #{}", index)))
    }

    pub fn get_entry_by_path(&self, path: &str) -> Result<Arc<Entry>> {
        self.by_path
            .get(path)
            .map(|&i| Arc::clone(&self.entries[i]))
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }

    pub fn get_entry_by_title(&self, title: &str) -> Result<Arc<Entry>> {
        self.by_title
            .get(title)
            .map(|&i| Arc::clone(&self.entries[i]))
            .ok_or_else(|| BridgeError::NotFound(format!("title {}", title)))
    }

    pub fn has_entry_by_path(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn has_entry_by_title(&self, title: &str) -> bool {
        self.by_title.contains_key(title)
    }

    pub fn has_main_entry(&self) -> bool {
        self.main_path.is_some()
    }

    pub fn main_entry(&self) -> Result<Arc<Entry>> {
        match &self.main_path {
            Some(path) => self.get_entry_by_path(path),
            None => Err(BridgeError::NotFound("main entry".to_string())),
        }
    }

    /// The item behind `entry`. Redirects are followed when asked to, and are
    /// an error otherwise.
    pub fn get_item(&self, entry: &Entry, follow_redirect: bool) -> Result<Arc<Item>> {
        if entry.is_redirect() && !follow_redirect {
            return Err(BridgeError::CallerError(format!(
                "{} is a redirect; pass follow_redirect to resolve it",
                entry.path
            )));
        }
        let mut current: &Entry = entry;
        // Bounded so a redirect cycle terminates.
        for _ in 0..=self.entries.len() {
            match &current.target {
                EntryTarget::Item(item) => return Ok(Arc::clone(item)),
                EntryTarget::Redirect(target) => {
                    let index = *self
                        .by_path
                        .get(target.as_str())
                        .ok_or_else(|| BridgeError::NotFound(target.clone()))?;
                    current = &self.entries[index];
                }
            }
        }
        Err(BridgeError::Engine(format!(
            "redirect loop starting at {}",
            entry.path
        )))
    }

    /// A random entry with content. Redirects are never picked.
    pub fn get_random_entry(&self) -> Result<Arc<Entry>> {
        let candidates: Vec<&Arc<Entry>> =
            self.entries.iter().filter(|e| !e.is_redirect()).collect();
        if candidates.is_empty() {
            return Err(BridgeError::NotFound("random entry".to_string()));
        }
        let pick = rand::rng().random_range(0..candidates.len());
        Ok(Arc::clone(candidates[pick]))
    }

    /// Titles are always ordered on load, so any non-empty archive has one.
    pub fn has_title_index(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Whether the archive was written with indexing enabled.
    pub fn has_fulltext_index(&self) -> bool {
        self.fulltext_language.is_some()
    }

    pub fn fulltext_language(&self) -> Option<&str> {
        self.fulltext_language.as_deref()
    }

    pub fn iter_by_path(&self) -> EntryRange {
        self.range_of(&self.path_order, |_| true)
    }

    /// Ordered by title, ties broken by path.
    pub fn iter_by_title(&self) -> EntryRange {
        self.range_of(&self.title_order, |_| true)
    }

    /// Storage order.
    pub fn iter_efficient(&self) -> EntryRange {
        EntryRange::new(self.entries.clone())
    }

    /// Entries whose path starts with `prefix`, ordered by path.
    pub fn find_by_path(&self, prefix: &str) -> EntryRange {
        self.range_of(&self.path_order, |e| e.path().starts_with(prefix))
    }

    /// Entries whose title starts with `prefix`, ordered by title.
    pub fn find_by_title(&self, prefix: &str) -> EntryRange {
        self.range_of(&self.title_order, |e| e.title().starts_with(prefix))
    }

    fn range_of(&self, order: &[usize], keep: impl Fn(&Arc<Entry>) -> bool) -> EntryRange {
        EntryRange::new(
            order
                .iter()
                .map(|&i| &self.entries[i])
                .filter(|&e| keep(e))
                .cloned()
                .collect(),
        )
    }

    pub fn illustration_sizes(&self) -> Vec<u32> {
        self.metadata
            .keys()
            .filter_map(|k| parse_illustration_key(k))
            .collect()
    }

    pub fn get_illustration_item(&self, size: u32) -> Result<Arc<Item>> {
        self.get_metadata_item(&illustration_key(size))
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("filename", &self.filename)
            .field("entries", &self.entries.len())
            .field("uuid", &self.uuid_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Compression;
    use super::image::MetadataRecord;

    fn item(path: &str, title: &str, body: &[u8], compress: bool) -> EntryRecord {
        let data = if compress {
            zstd::encode_all(body, 3).unwrap()
        } else {
            body.to_vec()
        };
        EntryRecord::Item {
            path: path.into(),
            title: title.into(),
            mime_type: "text/plain".into(),
            hints: Hints::default(),
            compressed: compress,
            size: body.len() as u64,
            data,
            index_data: None,
        }
    }

    fn sample_image() -> ArchiveImage {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "Title".to_string(),
            MetadataRecord {
                mime_type: "text/plain;charset=utf-8".into(),
                data: b"Sample".to_vec(),
            },
        );
        metadata.insert(
            illustration_key(48),
            MetadataRecord {
                mime_type: "image/png".into(),
                data: vec![0x89, b'P', b'N', b'G'],
            },
        );
        ArchiveImage {
            format_version: image::FORMAT_VERSION,
            uuid: [0xab; 16],
            main_path: Some("home".into()),
            compression: Compression::Zstd,
            cluster_size: 1024,
            fulltext_language: None,
            entries: vec![
                EntryRecord::Redirect {
                    path: "home".into(),
                    title: "Home".into(),
                    target: "page".into(),
                    hints: Hints::default(),
                },
                item("page", "Page", b"page body", true),
                item("raw", "", b"raw body", false),
            ],
            metadata,
        }
    }

    #[test]
    fn test_lookup_by_path_and_title() {
        let archive = Archive::from_image(sample_image()).unwrap();
        assert_eq!(archive.entry_count(), 3);
        assert!(archive.has_entry_by_path("raw"));
        assert_eq!(archive.get_entry_by_title("raw").unwrap().path(), "raw");
        assert_eq!(archive.get_entry_by_title("Page").unwrap().path(), "page");
        assert!(matches!(
            archive.get_entry_by_path("missing"),
            Err(BridgeError::NotFound(_))
        ));
    }

    #[test]
    fn test_entries_are_shared_allocations() {
        let archive = Archive::from_image(sample_image()).unwrap();
        let a = archive.get_entry_by_path("page").unwrap();
        let b = archive.get_entry_by_index(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_redirects_and_main_entry() {
        let archive = Archive::from_image(sample_image()).unwrap();
        let main = archive.main_entry().unwrap();
        assert!(main.is_redirect());
        assert!(archive.get_item(&main, false).is_err());

        let item = archive.get_item(&main, true).unwrap();
        assert_eq!(item.path(), "page");
        assert_eq!(item.data().to_string(), "page body");
        assert_eq!(item.get_data(5, 100).to_string(), "body");
    }

    #[test]
    fn test_metadata_and_illustrations() {
        let archive = Archive::from_image(sample_image()).unwrap();
        assert_eq!(archive.get_metadata("Title").unwrap(), "Sample");
        assert_eq!(archive.metadata_keys(), vec!["Title".to_string()]);
        assert_eq!(archive.illustration_sizes(), vec![48]);
        assert_eq!(archive.get_illustration_item(48).unwrap().size(), 4);
        assert_eq!(archive.uuid_string(), "abababab-abab-abab-abab-abababababab");
    }

    #[test]
    fn test_ordered_ranges_and_prefix_lookup() {
        let archive = Archive::from_image(sample_image()).unwrap();
        assert_eq!(archive.iter_by_path().paths(), ["home", "page", "raw"]);
        // "raw" has no title and sorts by its path.
        assert_eq!(archive.iter_by_title().paths(), ["home", "page", "raw"]);
        assert_eq!(archive.iter_efficient().size(), 3);

        assert_eq!(archive.find_by_path("p").paths(), ["page"]);
        assert_eq!(archive.find_by_title("H").paths(), ["home"]);
        assert!(archive.find_by_path("zzz").is_empty());

        let all = archive.iter_by_path();
        assert_eq!(all.offset(1, 10).paths(), ["page", "raw"]);
        assert_eq!(all.offset(0, 1).paths(), ["home"]);
        assert!(all.offset(5, 1).is_empty());

        let via_range = archive.find_by_path("page").into_iter().next().unwrap();
        assert!(Arc::ptr_eq(&via_range, &archive.get_entry_by_path("page").unwrap()));
    }

    #[test]
    fn test_random_entry_skips_redirects_and_index_flags() {
        let archive = Archive::from_image(sample_image()).unwrap();
        for _ in 0..20 {
            assert!(!archive.get_random_entry().unwrap().is_redirect());
        }
        assert!(archive.has_title_index());
        assert!(!archive.has_fulltext_index());

        let mut image = sample_image();
        image.entries.clear();
        image.fulltext_language = Some("eng".into());
        let empty = Archive::from_image(image).unwrap();
        assert!(matches!(empty.get_random_entry(), Err(BridgeError::NotFound(_))));
        assert!(!empty.has_title_index());
        assert!(empty.has_fulltext_index());
    }

    #[test]
    fn test_open_round_trips_through_disk() {
        let path = std::env::temp_dir().join(format!("zim-bridge-reader-{}.json", std::process::id()));
        sample_image().save(&path).unwrap();
        let archive = Archive::open(&path).unwrap();
        assert_eq!(archive.filename(), Some(path.as_path()));
        assert_eq!(archive.entry_count(), 3);
        std::fs::remove_file(&path).unwrap();
    }
}
