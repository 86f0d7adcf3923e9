// In: src/config.rs

//! Configuration for bridges and for the archive creator.
//!
//! Both structs are plain serde types so they can come from a JSON document
//! (e.g. handed over by the host) as easily as from code. Missing fields fall
//! back to the defaults below.

use serde::{Deserialize, Serialize};

use crate::error::Result;

//==================================================================================
// I. Enums
//==================================================================================

/// Cluster compression applied to item content.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Content is stored as fed.
    None,
    /// **Default:** content is zstd-compressed unless the item hints otherwise.
    #[default]
    Zstd,
}

impl Compression {
    /// Parses the host-facing names (`"none"`, `"zstd"`, case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Compression::None),
            "zstd" => Some(Compression::Zstd),
            _ => None,
        }
    }
}

//==================================================================================
// II. Bridge configuration
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum number of queued calls per bridge. 0 means unbounded.
    pub queue_capacity: usize,
    /// Used in log lines and in error messages.
    pub name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 0,
            name: "bridge".to_string(),
        }
    }
}

//==================================================================================
// III. Creator configuration
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct IndexingConfig {
    pub enabled: bool,
    /// ISO 639-3 language of the indexed content.
    pub language: String,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            language: "eng".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CreatorConfig {
    pub verbose: bool,
    pub compression: Compression,
    /// zstd level used when `compression` is `Zstd`.
    pub compression_level: i32,
    /// Target uncompressed cluster size in bytes.
    pub cluster_size: u64,
    pub indexing: IndexingConfig,
    /// Number of worker threads pulling item content.
    pub nb_workers: usize,
    /// Queue capacity for the bridges the creator builds around host objects.
    pub feed_queue_capacity: usize,
}

impl Default for CreatorConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            compression: Compression::default(),
            compression_level: 3,
            cluster_size: 2 * 1024 * 1024,
            indexing: IndexingConfig::default(),
            nb_workers: 4,
            feed_queue_capacity: 0,
        }
    }
}

impl CreatorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn bridge_config(&self, name: &str) -> BridgeConfig {
        BridgeConfig {
            queue_capacity: self.feed_queue_capacity,
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config =
            CreatorConfig::from_json_str(r#"{"compression": "none", "nb_workers": 2}"#).unwrap();
        assert_eq!(config.compression, Compression::None);
        assert_eq!(config.nb_workers, 2);
        assert_eq!(config.cluster_size, 2 * 1024 * 1024);
        assert!(!config.indexing.enabled);
    }

    #[test]
    fn test_unknown_compression_is_an_error() {
        assert!(CreatorConfig::from_json_str(r#"{"compression": "lzma"}"#).is_err());
        assert_eq!(Compression::from_name("ZSTD"), Some(Compression::Zstd));
        assert_eq!(Compression::from_name("lzma"), None);
    }
}
