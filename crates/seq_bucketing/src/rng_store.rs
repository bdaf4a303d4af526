//! Per-worker persisted shuffle seeds.
//!
//! Each data-loading worker owns one snapshot: a single `u32` seed. At the start
//! of a shuffle the worker reads its snapshot (falling back to a default seed when
//! there is none), seeds its RNG from it, and at the end draws a fresh seed from
//! that same RNG and writes it back. Epochs therefore continue one logical random
//! stream per worker, even when the worker process is torn down and respawned
//! between epochs, and rolling a snapshot back reproduces the epoch exactly.
//!
//! Snapshots are partitioned by [`WorkerId`], so two workers never touch the same
//! key and no locking across processes is needed.
//!
//! Failures here never abort an epoch: a snapshot that cannot be read degrades to
//! the default seed, and a snapshot that cannot be written is retried on the next
//! epoch. Both are logged since they silently break reproducibility.

use crate::dataloader::current_worker_identity;
use crate::error::BatchingError;
use anyhow::Result;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Seed used when a worker has no snapshot on record.
pub const DEFAULT_SEED: u32 = 42;

/// Placeholder substituted with the worker identity in a path template.
pub const WORKER_PLACEHOLDER: &str = "{worker}";

/// Stable identity of one data-loading worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(String);

impl WorkerId {
    /// Creates a worker identity. The name ends up in a file name, so it must be
    /// non-empty and free of path separators.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.contains('\0')
        {
            return Err(BatchingError::Configuration(format!(
                "invalid worker identity {name:?}: must be non-empty and contain no path separators"
            ))
            .into());
        }
        Ok(Self(name))
    }

    /// Identity of the `index`-th parallel worker.
    pub fn from_index(index: usize) -> Self {
        Self(index.to_string())
    }

    /// Identity used when loading runs on the consumer thread.
    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum RngStoreError {
    #[error("rng snapshot io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("rng snapshot at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("rng snapshot for worker '{worker}' unavailable: {reason}")]
    Unavailable { worker: WorkerId, reason: String },
}

/// Durable key-value store of seeds, keyed by worker identity.
pub trait RngStateStore: Send + Sync {
    /// Returns `Ok(None)` when the worker has no snapshot on record.
    fn load(&self, worker: &WorkerId) -> Result<Option<u32>, RngStoreError>;

    /// Overwrites the worker's snapshot.
    fn store(&self, worker: &WorkerId, seed: u32) -> Result<(), RngStoreError>;
}

/// Stores one JSON-encoded integer per worker at a templated path.
///
/// The template must contain `{worker}`, e.g. `/data/run-7/rng-{worker}`.
/// Writes go through a temp file in the same directory which is then renamed
/// over the target, so readers only ever see a complete snapshot.
#[derive(Debug, Clone)]
pub struct FileRngStore {
    path_template: String,
}

impl FileRngStore {
    pub fn new(path_template: impl Into<String>) -> Result<Self> {
        let path_template = path_template.into();
        if !path_template.contains(WORKER_PLACEHOLDER) {
            return Err(BatchingError::Configuration(format!(
                "rng store path template '{path_template}' must contain '{WORKER_PLACEHOLDER}'"
            ))
            .into());
        }
        Ok(Self { path_template })
    }

    /// On-disk location of `worker`'s snapshot.
    pub fn path_for(&self, worker: &WorkerId) -> PathBuf {
        PathBuf::from(self.path_template.replace(WORKER_PLACEHOLDER, worker.as_str()))
    }
}

impl RngStateStore for FileRngStore {
    fn load(&self, worker: &WorkerId) -> Result<Option<u32>, RngStoreError> {
        let path = self.path_for(worker);
        let contents = {
            let mut file = match File::open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(source) => return Err(RngStoreError::Io { path, source }),
            };
            let mut contents = String::new();
            if let Err(source) = file.read_to_string(&mut contents) {
                return Err(RngStoreError::Io { path, source });
            }
            contents
        };
        serde_json::from_str::<u32>(contents.trim())
            .map(Some)
            .map_err(|err| RngStoreError::Corrupt {
                path,
                reason: err.to_string(),
            })
    }

    fn store(&self, worker: &WorkerId, seed: u32) -> Result<(), RngStoreError> {
        let path = self.path_for(worker);
        let io_err = |source| RngStoreError::Io {
            path: path.clone(),
            source,
        };
        let dir = parent_dir(&path);
        fs::create_dir_all(&dir).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &seed).map_err(|err| io_err(err.into()))?;
            writer.flush().map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Process-local store, used for single-process runs and as a test fake.
#[derive(Debug, Default)]
pub struct InMemoryRngStore {
    seeds: Mutex<HashMap<WorkerId, u32>>,
}

impl InMemoryRngStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RngStateStore for InMemoryRngStore {
    fn load(&self, worker: &WorkerId) -> Result<Option<u32>, RngStoreError> {
        let seeds = self.seeds.lock().map_err(|_| RngStoreError::Unavailable {
            worker: worker.clone(),
            reason: "store mutex poisoned".to_string(),
        })?;
        Ok(seeds.get(worker).copied())
    }

    fn store(&self, worker: &WorkerId, seed: u32) -> Result<(), RngStoreError> {
        let mut seeds = self.seeds.lock().map_err(|_| RngStoreError::Unavailable {
            worker: worker.clone(),
            reason: "store mutex poisoned".to_string(),
        })?;
        seeds.insert(worker.clone(), seed);
        Ok(())
    }
}

/// One worker's view of its persisted random stream.
///
/// This is the boundary where persistence failures are absorbed: nothing it
/// returns is an error.
#[derive(Clone)]
pub struct SeedStream {
    store: Arc<dyn RngStateStore>,
    worker: WorkerId,
    default_seed: u32,
}

impl fmt::Debug for SeedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedStream")
            .field("worker", &self.worker)
            .field("default_seed", &self.default_seed)
            .finish_non_exhaustive()
    }
}

impl SeedStream {
    pub fn new(store: Arc<dyn RngStateStore>, worker: WorkerId) -> Self {
        Self {
            store,
            worker,
            default_seed: DEFAULT_SEED,
        }
    }

    /// A stream keyed by the calling thread: its loader worker index on a
    /// worker thread, `main` anywhere else.
    pub fn for_current_thread(store: Arc<dyn RngStateStore>) -> Self {
        Self::new(store, current_worker_identity())
    }

    /// A stream backed by a fresh in-memory store.
    pub fn in_memory(worker: WorkerId) -> Self {
        Self::new(Arc::new(InMemoryRngStore::new()), worker)
    }

    pub fn with_default_seed(mut self, seed: u32) -> Self {
        self.default_seed = seed;
        self
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    pub fn default_seed(&self) -> u32 {
        self.default_seed
    }

    /// Seed to start the next shuffle from.
    pub fn current(&self) -> u32 {
        match self.store.load(&self.worker) {
            Ok(Some(seed)) => seed,
            Ok(None) => {
                tracing::debug!(
                    worker = %self.worker,
                    seed = self.default_seed,
                    "no rng snapshot on record, using default seed"
                );
                self.default_seed
            }
            Err(err) => {
                tracing::warn!(
                    worker = %self.worker,
                    seed = self.default_seed,
                    error = %err,
                    "failed to load rng snapshot, falling back to default seed"
                );
                self.default_seed
            }
        }
    }

    /// Draws the next seed from `rng` and persists it. Returns the drawn seed
    /// whether or not it could be stored.
    pub fn advance<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let next = rng.random_range(0..u32::MAX);
        if let Err(err) = self.store.store(&self.worker, next) {
            tracing::warn!(
                worker = %self.worker,
                error = %err,
                "failed to persist rng snapshot; the next epoch will not continue this stream"
            );
        }
        next
    }
}

#[cfg(test)]
mod rng_store_tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn template_in(dir: &Path) -> String {
        dir.join("rng-{worker}").to_string_lossy().into_owned()
    }

    #[test]
    fn worker_id_rejects_path_like_names() {
        assert!(WorkerId::new("w0").is_ok());
        assert!(WorkerId::new("").is_err());
        assert!(WorkerId::new("a/b").is_err());
        assert!(WorkerId::new("..").is_err());
        assert_eq!(WorkerId::from_index(3).as_str(), "3");
    }

    #[test]
    fn template_requires_placeholder() {
        assert!(FileRngStore::new("/tmp/rng").is_err());
        assert!(FileRngStore::new("/tmp/rng-{worker}").is_ok());
    }

    #[test]
    fn file_store_round_trips_full_u32_range() -> Result<()> {
        let dir = tempdir()?;
        let store = FileRngStore::new(template_in(dir.path()))?;
        let worker = WorkerId::new("w0")?;

        assert_eq!(store.load(&worker)?, None);
        for seed in [0, 42, u32::MAX - 1, u32::MAX] {
            store.store(&worker, seed)?;
            assert_eq!(store.load(&worker)?, Some(seed));
        }
        assert!(store.path_for(&worker).ends_with("rng-w0"));
        Ok(())
    }

    #[test]
    fn file_store_creates_missing_parent_dirs() -> Result<()> {
        let dir = tempdir()?;
        let template = dir
            .path()
            .join("nested/deeper/rng-{worker}")
            .to_string_lossy()
            .into_owned();
        let store = FileRngStore::new(template)?;
        let worker = WorkerId::from_index(1);
        store.store(&worker, 7)?;
        assert_eq!(store.load(&worker)?, Some(7));
        Ok(())
    }

    #[test]
    fn workers_do_not_share_snapshots() -> Result<()> {
        let dir = tempdir()?;
        let store = FileRngStore::new(template_in(dir.path()))?;
        store.store(&WorkerId::from_index(0), 1)?;
        store.store(&WorkerId::from_index(1), 2)?;
        assert_eq!(store.load(&WorkerId::from_index(0))?, Some(1));
        assert_eq!(store.load(&WorkerId::from_index(1))?, Some(2));
        Ok(())
    }

    #[test]
    fn corrupt_snapshot_degrades_to_default() -> Result<()> {
        let dir = tempdir()?;
        let store = Arc::new(FileRngStore::new(template_in(dir.path()))?);
        let worker = WorkerId::new("w0")?;
        fs::write(store.path_for(&worker), b"not a seed")?;

        assert!(matches!(
            store.load(&worker),
            Err(RngStoreError::Corrupt { .. })
        ));
        let stream = SeedStream::new(store, worker);
        assert_eq!(stream.current(), DEFAULT_SEED);
        Ok(())
    }

    #[test]
    fn unwritable_store_is_absorbed() -> Result<()> {
        let dir = tempdir()?;
        // A regular file where the snapshot directory should be.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"")?;
        let template = blocker.join("rng-{worker}").to_string_lossy().into_owned();
        let stream = SeedStream::new(Arc::new(FileRngStore::new(template)?), WorkerId::main());

        let mut rng = StdRng::seed_from_u64(1);
        let drawn = stream.advance(&mut rng);
        assert!(drawn < u32::MAX);
        assert_eq!(stream.current(), DEFAULT_SEED);
        Ok(())
    }

    #[test]
    fn current_thread_stream_uses_worker_slot() -> Result<()> {
        use crate::dataloader::WORKER_ID;

        let store: Arc<dyn RngStateStore> = Arc::new(InMemoryRngStore::new());
        assert_eq!(
            SeedStream::for_current_thread(store.clone()).worker(),
            &WorkerId::main()
        );

        let worker_store = store.clone();
        let drawn = std::thread::spawn(move || {
            WORKER_ID.with(|id| *id.borrow_mut() = Some(2));
            let stream = SeedStream::for_current_thread(worker_store);
            let mut rng = StdRng::seed_from_u64(stream.current() as u64);
            (stream.worker().clone(), stream.advance(&mut rng))
        })
        .join()
        .unwrap();

        assert_eq!(drawn.0, WorkerId::from_index(2));
        assert_eq!(store.load(&WorkerId::from_index(2))?, Some(drawn.1));
        assert_eq!(store.load(&WorkerId::main())?, None);
        Ok(())
    }

    #[test]
    fn advance_persists_drawn_seed() {
        let stream = SeedStream::in_memory(WorkerId::main()).with_default_seed(5);
        assert_eq!(stream.current(), 5);
        let mut rng = StdRng::seed_from_u64(stream.current() as u64);
        let next = stream.advance(&mut rng);
        assert_eq!(stream.current(), next);
    }
}
