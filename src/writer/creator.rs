// In: src/writer/creator.rs

//! The archive engine.
//!
//! `Creator` is internally synchronized and shared behind an `Arc`. Items are
//! handed to a pool of `nb_workers` threads that pull their content through
//! [`ContentProvider::feed`]; metadata and illustrations are pulled by the
//! thread that finishes the archive.
//!
//! Items that reach into the host (through bridges) can only make progress
//! while the host thread is servicing its queue. Drive such a creator from a
//! worker with [`HostScope::run_worker`](crate::host::HostScope::run_worker),
//! as [`HostCreator`](crate::module::HostCreator) does.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use hashbrown::HashSet;

use crate::config::{Compression, CreatorConfig};
use crate::error::{BridgeError, Result};
use crate::reader::image::{ArchiveImage, EntryRecord, MetadataRecord, FORMAT_VERSION};
use crate::reader::{illustration_key, Archive};
use crate::writer::item::{Hints, IndexData, WriterItem};
use crate::writer::provider::{ContentProvider, StringProvider};

pub const DEFAULT_METADATA_MIMETYPE: &str = "text/plain;charset=utf-8";
const ILLUSTRATION_MIMETYPE: &str = "image/png";

/// Pulls exactly `provider.size()` bytes out of `provider`.
///
/// An empty chunk before the declared size is reached, or a chunk that
/// overshoots it, is an engine error. No `feed()` is issued once the declared
/// size has been delivered.
pub fn drain_provider(provider: &mut dyn ContentProvider, what: &str) -> Result<Vec<u8>> {
    let size = provider.size();
    let mut data = Vec::with_capacity(usize::try_from(size).unwrap_or(0).min(1 << 20));
    while (data.len() as u64) < size {
        let chunk = provider.feed()?;
        if chunk.is_empty() {
            return Err(BridgeError::Engine(format!(
                "{}: content provider stopped after {} of {} declared bytes",
                what,
                data.len(),
                size
            )));
        }
        data.extend_from_slice(&chunk);
        if data.len() as u64 > size {
            return Err(BridgeError::Engine(format!(
                "{}: content provider delivered {} bytes, more than the {} declared",
                what,
                data.len(),
                size
            )));
        }
    }
    Ok(data)
}

//==================================================================================
// I. State
//==================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configuring,
    Started,
    Finished,
}

struct PendingMetadata {
    name: String,
    mime_type: String,
    provider: Box<dyn ContentProvider>,
}

struct Redirection {
    path: String,
    title: String,
    target: String,
    hints: Hints,
}

struct ItemJob {
    path: String,
    title: String,
    mime_type: String,
    hints: Hints,
    item: Arc<dyn WriterItem>,
}

#[derive(Default)]
struct Collected {
    records: Vec<EntryRecord>,
    errors: Vec<BridgeError>,
}

#[derive(Debug, Clone, Copy)]
struct ContentSettings {
    compression: Compression,
    level: i32,
    indexing: bool,
    verbose: bool,
}

struct WorkerPool {
    sender: Sender<ItemJob>,
    workers: Vec<JoinHandle<()>>,
    collected: Arc<Mutex<Collected>>,
}

struct CreatorState {
    config: CreatorConfig,
    phase: Phase,
    output: Option<PathBuf>,
    main_path: Option<String>,
    uuid: Option<[u8; 16]>,
    paths: HashSet<String>,
    metadata: Vec<PendingMetadata>,
    illustrations: Vec<(u32, Box<dyn ContentProvider>)>,
    redirections: Vec<Redirection>,
    pool: Option<WorkerPool>,
}

impl CreatorState {
    fn ensure_phase(&self, expected: Phase, operation: &str) -> Result<()> {
        if self.phase == expected {
            return Ok(());
        }
        let reason = match self.phase {
            Phase::Configuring => "startZimCreation has not been called",
            Phase::Started => "creation has already started",
            Phase::Finished => "the archive is already finished",
        };
        Err(BridgeError::CallerError(format!(
            "cannot {}: {}",
            operation, reason
        )))
    }

    fn claim_path(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(BridgeError::Engine("entry path must not be empty".to_string()));
        }
        if !self.paths.insert(path.to_string()) {
            return Err(BridgeError::Engine(format!(
                "an entry with path {} was already added",
                path
            )));
        }
        Ok(())
    }
}

//==================================================================================
// II. Creator
//==================================================================================

pub struct Creator {
    state: Mutex<CreatorState>,
}

impl Default for Creator {
    fn default() -> Self {
        Self::new()
    }
}

impl Creator {
    pub fn new() -> Self {
        Self::with_config(CreatorConfig::default())
    }

    pub fn with_config(config: CreatorConfig) -> Self {
        Self {
            state: Mutex::new(CreatorState {
                config,
                phase: Phase::Configuring,
                output: None,
                main_path: None,
                uuid: None,
                paths: HashSet::new(),
                metadata: Vec::new(),
                illustrations: Vec::new(),
                redirections: Vec::new(),
                pool: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CreatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn configure(&self, what: &str, apply: impl FnOnce(&mut CreatorConfig)) -> Result<()> {
        let mut state = self.lock();
        state.ensure_phase(Phase::Configuring, what)?;
        apply(&mut state.config);
        Ok(())
    }

    pub fn config(&self) -> CreatorConfig {
        self.lock().config.clone()
    }

    // --- Configuration (before start) ---

    pub fn config_verbose(&self, verbose: bool) -> Result<()> {
        self.configure("configVerbose", |c| c.verbose = verbose)
    }

    pub fn config_compression(&self, compression: Compression) -> Result<()> {
        self.configure("configCompression", |c| c.compression = compression)
    }

    pub fn config_cluster_size(&self, size: u64) -> Result<()> {
        if size == 0 {
            return Err(BridgeError::CallerError(
                "cluster size must be greater than 0".to_string(),
            ));
        }
        self.configure("configClusterSize", |c| c.cluster_size = size)
    }

    pub fn config_indexing(&self, enabled: bool, language: &str) -> Result<()> {
        let language = language.to_string();
        self.configure("configIndexing", |c| {
            c.indexing.enabled = enabled;
            c.indexing.language = language;
        })
    }

    pub fn config_nb_workers(&self, workers: usize) -> Result<()> {
        self.configure("configNbWorkers", |c| c.nb_workers = workers.max(1))
    }

    // --- Creation ---

    /// Starts the worker pool. With `output`, the finished archive is also
    /// written there.
    pub fn start_zim_creation(&self, output: Option<PathBuf>) -> Result<()> {
        let mut state = self.lock();
        state.ensure_phase(Phase::Configuring, "startZimCreation")?;

        let settings = ContentSettings {
            compression: state.config.compression,
            level: state.config.compression_level,
            indexing: state.config.indexing.enabled,
            verbose: state.config.verbose,
        };
        let (sender, receiver) = mpsc::channel::<ItemJob>();
        let receiver = Arc::new(Mutex::new(receiver));
        let collected = Arc::new(Mutex::new(Collected::default()));

        let mut workers = Vec::with_capacity(state.config.nb_workers);
        for id in 0..state.config.nb_workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let collected = Arc::clone(&collected);
            let handle = thread::Builder::new()
                .name(format!("zim-worker-{}", id))
                .spawn(move || worker_loop(&receiver, &collected, settings))?;
            workers.push(handle);
        }

        log::info!(
            "starting archive creation ({} worker(s), compression {:?}){}",
            workers.len(),
            settings.compression,
            output
                .as_ref()
                .map(|p| format!(" -> {}", p.display()))
                .unwrap_or_default()
        );
        state.pool = Some(WorkerPool {
            sender,
            workers,
            collected,
        });
        state.output = output;
        state.phase = Phase::Started;
        Ok(())
    }

    /// Queues an item. Its path, title, mime type and hints are read on the
    /// calling thread; its content is pulled later by a worker.
    pub fn add_item(&self, item: Arc<dyn WriterItem>) -> Result<()> {
        // Queried before locking: these may block on the host.
        let path = item.path()?;
        let title = item.title()?;
        let mime_type = item.mime_type()?;
        let hints = item.hints()?;

        let mut state = self.lock();
        state.ensure_phase(Phase::Started, "addItem")?;
        state.claim_path(&path)?;
        if state.config.verbose {
            log::info!("adding item {} ({})", path, mime_type);
        } else {
            log::debug!("adding item {} ({})", path, mime_type);
        }
        let pool = state
            .pool
            .as_ref()
            .ok_or_else(|| BridgeError::Engine("worker pool is not running".to_string()))?;
        pool.sender
            .send(ItemJob {
                path,
                title,
                mime_type,
                hints,
                item,
            })
            .map_err(|_| BridgeError::Engine("worker pool has shut down".to_string()))
    }

    pub fn add_metadata(
        &self,
        name: &str,
        provider: Box<dyn ContentProvider>,
        mime_type: Option<&str>,
    ) -> Result<()> {
        let mut state = self.lock();
        state.ensure_phase(Phase::Started, "addMetadata")?;
        if state.metadata.iter().any(|m| m.name == name) {
            return Err(BridgeError::Engine(format!(
                "metadata {} was already added",
                name
            )));
        }
        state.metadata.push(PendingMetadata {
            name: name.to_string(),
            mime_type: mime_type.unwrap_or(DEFAULT_METADATA_MIMETYPE).to_string(),
            provider,
        });
        Ok(())
    }

    pub fn add_metadata_str(&self, name: &str, content: &str, mime_type: Option<&str>) -> Result<()> {
        self.add_metadata(name, Box::new(StringProvider::new(content)), mime_type)
    }

    pub fn add_illustration(&self, size: u32, provider: Box<dyn ContentProvider>) -> Result<()> {
        let mut state = self.lock();
        state.ensure_phase(Phase::Started, "addIllustration")?;
        if state.illustrations.iter().any(|(s, _)| *s == size) {
            return Err(BridgeError::Engine(format!(
                "an illustration of size {} was already added",
                size
            )));
        }
        state.illustrations.push((size, provider));
        Ok(())
    }

    pub fn add_redirection(&self, path: &str, title: &str, target: &str, hints: Hints) -> Result<()> {
        let mut state = self.lock();
        state.ensure_phase(Phase::Started, "addRedirection")?;
        state.claim_path(path)?;
        state.redirections.push(Redirection {
            path: path.to_string(),
            title: title.to_string(),
            target: target.to_string(),
            hints,
        });
        Ok(())
    }

    pub fn set_main_path(&self, path: &str) -> Result<()> {
        let mut state = self.lock();
        if state.phase == Phase::Finished {
            return state.ensure_phase(Phase::Started, "setMainPath");
        }
        state.main_path = Some(path.to_string());
        Ok(())
    }

    /// Sets the archive UUID; it must be exactly 16 bytes.
    pub fn set_uuid(&self, uuid: &[u8]) -> Result<()> {
        let uuid: [u8; 16] = uuid.try_into().map_err(|_| {
            BridgeError::CallerError(format!("uuid must be 16 bytes, got {}", uuid.len()))
        })?;
        let mut state = self.lock();
        if state.phase == Phase::Finished {
            return state.ensure_phase(Phase::Started, "setUuid");
        }
        state.uuid = Some(uuid);
        Ok(())
    }

    /// Waits for every queued item, pulls metadata and illustrations, and
    /// produces the archive.
    pub fn finish_zim_creation(&self) -> Result<Archive> {
        let (pool, metadata, illustrations, redirections, main_path, uuid, output, config) = {
            let mut state = self.lock();
            state.ensure_phase(Phase::Started, "finishZimCreation")?;
            state.phase = Phase::Finished;
            (
                state.pool.take(),
                std::mem::take(&mut state.metadata),
                std::mem::take(&mut state.illustrations),
                std::mem::take(&mut state.redirections),
                state.main_path.take(),
                state.uuid,
                state.output.take(),
                state.config.clone(),
            )
        };

        let mut records = match pool {
            Some(pool) => pool.shutdown()?,
            None => Vec::new(),
        };

        let mut metadata_records = BTreeMap::new();
        for mut pending in metadata {
            let data = drain_provider(pending.provider.as_mut(), &pending.name)?;
            metadata_records.insert(
                pending.name,
                MetadataRecord {
                    mime_type: pending.mime_type,
                    data,
                },
            );
        }
        for (size, mut provider) in illustrations {
            let key = illustration_key(size);
            let data = drain_provider(provider.as_mut(), &key)?;
            metadata_records.insert(
                key,
                MetadataRecord {
                    mime_type: ILLUSTRATION_MIMETYPE.to_string(),
                    data,
                },
            );
        }

        validate_targets(&records, &redirections, main_path.as_deref())?;

        records.extend(redirections.into_iter().map(|r| EntryRecord::Redirect {
            path: r.path,
            title: r.title,
            target: r.target,
            hints: r.hints,
        }));
        records.sort_by(|a, b| a.path().cmp(b.path()));

        let image = ArchiveImage {
            format_version: FORMAT_VERSION,
            uuid: uuid.unwrap_or_else(rand::random),
            main_path,
            compression: config.compression,
            cluster_size: config.cluster_size,
            fulltext_language: config
                .indexing
                .enabled
                .then(|| config.indexing.language.clone()),
            entries: records,
            metadata: metadata_records,
        };
        log_metric!(
            "event" = "archive_finished",
            "entries" = &image.entries.len(),
            "metadata" = &image.metadata.len()
        );

        if let Some(path) = &output {
            image.save(path)?;
            log::info!("archive written to {}", path.display());
        }
        let entry_count = image.entries.len();
        let archive = Archive::from_image(image)?;
        log::info!("finished archive with {} entries", entry_count);
        Ok(archive)
    }
}

/// Every redirection and the main path must name an entry of the archive.
fn validate_targets(
    records: &[EntryRecord],
    redirections: &[Redirection],
    main_path: Option<&str>,
) -> Result<()> {
    let item_paths: HashSet<&str> = records.iter().map(EntryRecord::path).collect();
    let redirect_paths: HashSet<&str> = redirections.iter().map(|r| r.path.as_str()).collect();
    let exists = |path: &str| item_paths.contains(path) || redirect_paths.contains(path);

    for redirection in redirections {
        if !exists(redirection.target.as_str()) {
            return Err(BridgeError::Engine(format!(
                "redirection {} points to missing entry {}",
                redirection.path, redirection.target
            )));
        }
    }
    match main_path {
        Some(main) if !exists(main) => Err(BridgeError::Engine(format!(
            "main path {} does not name an entry",
            main
        ))),
        _ => Ok(()),
    }
}

impl fmt::Debug for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Creator")
            .field("phase", &state.phase)
            .field("entries", &state.paths.len())
            .finish()
    }
}

//==================================================================================
// III. Worker pool
//==================================================================================

impl WorkerPool {
    /// Closes the queue, joins every worker and returns what they produced,
    /// or the first error any of them hit.
    fn shutdown(self) -> Result<Vec<EntryRecord>> {
        drop(self.sender);
        for worker in self.workers {
            worker
                .join()
                .map_err(|_| BridgeError::Engine("an archive worker panicked".to_string()))?;
        }
        let mut collected = self
            .collected
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(first) = collected.errors.first().cloned() {
            log::error!(
                "{} item(s) failed; first error: {}",
                collected.errors.len(),
                first
            );
            return Err(first);
        }
        Ok(std::mem::take(&mut collected.records))
    }
}

fn worker_loop(
    receiver: &Mutex<Receiver<ItemJob>>,
    collected: &Mutex<Collected>,
    settings: ContentSettings,
) {
    loop {
        let job = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(job) = job else {
            break;
        };
        let path = job.path.clone();
        let outcome = process_item(job, settings);
        let mut collected = collected.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(record) => {
                if settings.verbose {
                    log::info!("item {} written", path);
                }
                collected.records.push(record);
            }
            Err(e) => {
                log::error!("item {} failed: {}", path, e);
                collected.errors.push(e);
            }
        }
    }
}

fn process_item(job: ItemJob, settings: ContentSettings) -> Result<EntryRecord> {
    let mut provider = job.item.content_provider()?;
    let data = drain_provider(provider.as_mut(), &job.path)?;
    drop(provider);

    // Textual items without their own index data get a derived one.
    let index_data = if settings.indexing {
        job.item.index_data()?.or_else(|| {
            job.mime_type
                .starts_with("text/")
                .then(|| IndexData::from_text(&job.title, &data))
        })
    } else {
        None
    };

    let size = data.len() as u64;
    let compressed = settings.compression == Compression::Zstd && job.hints.wants_compression();
    let data = if compressed {
        zstd::encode_all(data.as_slice(), settings.level)?
    } else {
        data
    };

    Ok(EntryRecord::Item {
        path: job.path,
        title: job.title,
        mime_type: job.mime_type,
        hints: job.hints,
        compressed,
        size,
        data,
        index_data,
    })
}
