use std::collections::BTreeMap;
use std::fs::{self, File};
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiResult;

/// Small persistent key-value store holding JSON-shaped records.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> ApiResult<Option<Value>>;
    fn store(&self, key: &str, value: Value) -> ApiResult<()>;
    fn remove(&self, key: &str) -> ApiResult<()>;
}

impl dyn KeyValueStore + '_ {
    pub fn load_as<T: DeserializeOwned>(&self, key: &str) -> ApiResult<Option<T>> {
        self.load(key)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    pub fn store_as<T: Serialize>(&self, key: &str, value: &T) -> ApiResult<()> {
        self.store(key, serde_json::to_value(value)?)
    }
}

type Records = BTreeMap<String, Value>;

fn lock(records: &Mutex<Records>) -> MutexGuard<'_, Records> {
    records.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> ApiResult<Option<Value>> {
        Ok(lock(&self.records).get(key).cloned())
    }

    fn store(&self, key: &str, value: Value) -> ApiResult<()> {
        lock(&self.records).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> ApiResult<()> {
        lock(&self.records).remove(key);
        Ok(())
    }
}

/// Store persisted as a single yaml document, rewritten on every change.
#[derive(Debug)]
pub struct YamlFileStore {
    filename: Utf8PathBuf,
    records: Mutex<Records>,
}

impl YamlFileStore {
    pub fn open(filename: &Utf8Path) -> ApiResult<Self> {
        let records = if filename.is_file() {
            log::debug!("[store] Loading state from {filename}");
            let fd = File::open(filename)?;
            serde_yml::from_reader::<_, Option<Records>>(fd)?.unwrap_or_default()
        } else {
            log::debug!("[store] No state file at {filename}, starting empty");
            Records::new()
        };

        Ok(Self {
            filename: filename.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &Records) -> ApiResult<()> {
        let tmp = self.filename.with_extension("tmp");
        serde_yml::to_writer(File::create(&tmp)?, records)?;
        fs::rename(&tmp, &self.filename)?;
        Ok(())
    }
}

impl KeyValueStore for YamlFileStore {
    fn load(&self, key: &str) -> ApiResult<Option<Value>> {
        Ok(lock(&self.records).get(key).cloned())
    }

    fn store(&self, key: &str, value: Value) -> ApiResult<()> {
        let mut records = lock(&self.records);
        records.insert(key.to_string(), value);
        self.persist(&records)
    }

    fn remove(&self, key: &str) -> ApiResult<()> {
        let mut records = lock(&self.records);
        if records.remove(key).is_some() {
            self.persist(&records)?;
        }
        Ok(())
    }
}
