// In: src/reader/image.rs

//! The serialized form of an archive.
//!
//! This is a JSON document, not the real on-disk cluster format: enough to
//! persist what the creator produced and read it back.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Compression;
use crate::error::{BridgeError, Result};
use crate::writer::item::{Hints, IndexData};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryRecord {
    Item {
        path: String,
        title: String,
        mime_type: String,
        #[serde(default)]
        hints: Hints,
        /// Whether `data` is zstd-compressed.
        compressed: bool,
        /// Uncompressed size.
        size: u64,
        data: Vec<u8>,
        #[serde(default)]
        index_data: Option<IndexData>,
    },
    Redirect {
        path: String,
        title: String,
        target: String,
        #[serde(default)]
        hints: Hints,
    },
}

impl EntryRecord {
    pub fn path(&self) -> &str {
        match self {
            EntryRecord::Item { path, .. } | EntryRecord::Redirect { path, .. } => path,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArchiveImage {
    pub format_version: u32,
    pub uuid: [u8; 16],
    pub main_path: Option<String>,
    pub compression: Compression,
    pub cluster_size: u64,
    pub fulltext_language: Option<String>,
    /// Sorted by path.
    pub entries: Vec<EntryRecord>,
    pub metadata: BTreeMap<String, MetadataRecord>,
}

impl ArchiveImage {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        fs::write(path, json)
            .map_err(|e| BridgeError::Io(format!("{}: {}", path.display(), e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| BridgeError::Io(format!("{}: {}", path.display(), e)))?;
        let image: ArchiveImage = serde_json::from_slice(&bytes)?;
        if image.format_version != FORMAT_VERSION {
            return Err(BridgeError::Engine(format!(
                "unsupported archive format version {} (expected {})",
                image.format_version, FORMAT_VERSION
            )));
        }
        Ok(image)
    }
}
