//! Device-side cache of the last weather record, persisted across restarts.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};

use crate::{clock::Clock, model::WeatherRecord};

/// Storage key of the persisted record. Changing it orphans existing caches.
pub const WEATHER_DATA_KEY: &str = "weather_relay_record.json";

/// Durable key/value storage for the cache.
pub trait Store: Send {
    /// `Ok(None)` when nothing was ever stored under `key`.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// One file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Store for FileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.dir.join(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;
        let path = self.dir.join(key);
        fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Most recent record plus lazy restore from a [`Store`].
///
/// Storage problems never reach the caller: unreadable data is "no data",
/// failed writes are logged and the in-memory entry is kept.
pub struct WeatherCache<S: Store> {
    store: S,
    clock: Arc<dyn Clock>,
    entry: Option<WeatherRecord>,
    loaded: bool,
}

impl<S: Store> WeatherCache<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, entry: None, loaded: false }
    }

    pub fn get(&mut self) -> Option<&WeatherRecord> {
        self.ensure_loaded();
        self.entry.as_ref()
    }

    /// True iff a record exists and is younger than `max_age_ms`.
    pub fn is_fresh(&mut self, max_age_ms: i64) -> bool {
        let now = self.clock.now_ms();
        self.get().is_some_and(|record| now.saturating_sub(record.timestamp()) < max_age_ms)
    }

    pub fn store(&mut self, record: WeatherRecord) {
        self.loaded = true;
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(err) = self.store.save(WEATHER_DATA_KEY, &bytes) {
                    warn!(error = %format!("{err:#}"), "failed to persist weather record");
                }
            }
            Err(err) => warn!(%err, "failed to encode weather record"),
        }
        self.entry = Some(record);
    }

    fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;
        self.entry = match self.store.load(WEATHER_DATA_KEY) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(record) => Some(record),
                Err(err) => {
                    debug!(%err, "ignoring corrupt persisted weather record");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                debug!(error = %format!("{err:#}"), "persisted weather record unavailable");
                None
            }
        };
    }
}
