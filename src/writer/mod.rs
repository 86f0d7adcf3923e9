// In: src/writer/mod.rs

//! The archive-writing side: content providers, items and the engine that
//! pulls content out of them on its worker threads.
//!
//! Host-implemented providers and items are reached through
//! [`ContentFeedAdapter`] and [`HostItemProxy`], both of which forward every
//! call to the host thread and block until it answers.

pub mod blob;
pub mod creator;
pub mod feed;
pub mod item;
pub mod provider;

pub use blob::Blob;
pub use creator::{drain_provider, Creator, DEFAULT_METADATA_MIMETYPE};
pub use feed::{provider_from_host, ContentFeedAdapter, FEED_BRIDGE};
pub use item::{FileItem, GeoPosition, Hints, HostItemProxy, IndexData, StringItem, WriterItem};
pub use provider::{ContentProvider, FileProvider, StringProvider};
