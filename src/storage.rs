use std::{
    collections::{BTreeMap, HashMap},
    env,
    fs::{self, File},
    io,
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Credential, Watermark};

const STORAGE_DIR_NAME: &str = ".reviewlog";
const STORE_FILE: &str = "store.json";

pub const USERNAME_KEY: &str = "username";
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Durable string-keyed storage. Values are raw JSON text.
pub trait Backend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, key: &str, raw: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Keeps every entry in one JSON object on disk.
///
/// Writes hold an exclusive lock on a sibling `.lock` file for the whole
/// read-modify-write, so separate processes sharing the file do not drop
/// each other's keys.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn initialize() -> Result<Self, StoreError> {
        let home = env::var("HOME").map_err(|_| StoreError::HomeDirMissing)?;
        Self::at(PathBuf::from(home).join(STORAGE_DIR_NAME).join(STORE_FILE))
    }

    pub fn at(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            fs::create_dir_all(dir)?;
        }
        Ok(Self { path })
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn update(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> Result<(), StoreError> {
        let lock = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path.with_extension("json.lock"))?;
        lock.lock()?;

        let mut entries = self.read_entries()?;
        if apply(&mut entries) {
            self.write_entries(&entries)?;
        }
        Ok(())
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(entries)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, data)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_entries()?.remove(key))
    }

    fn write(&self, key: &str, raw: String) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), raw);
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| entries.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_entries()?.into_keys().collect())
    }
}

/// Key-value store with an in-process shadow of parsed values in front of a
/// durable [`Backend`].
///
/// The shadow and the backend agree except after [`Store::clear_shadow`],
/// which empties the shadow and leaves durable entries in place until they
/// are overwritten.
pub struct Store {
    backend: Box<dyn Backend>,
    shadow: Mutex<HashMap<String, Value>>,
}

impl Store {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            shadow: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shadow copy when present and `bypass` is false, otherwise
    /// re-reads the durable copy and refreshes the shadow. Unreadable or
    /// malformed durable data yields `None`.
    pub fn get(&self, key: &str, bypass: bool) -> Option<Value> {
        let mut shadow = self.shadow();
        if !bypass && let Some(value) = shadow.get(key) {
            return Some(value.clone());
        }

        let raw = match self.backend.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                shadow.remove(key);
                return None;
            }
            Err(err) => {
                warn!(key, error = %err, "Failed to read stored value");
                return None;
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                shadow.insert(key.to_owned(), value.clone());
                Some(value)
            }
            Err(err) => {
                warn!(key, error = %err, "Error parsing stored json");
                shadow.remove(key);
                None
            }
        }
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str, bypass: bool) -> Option<T> {
        let value = self.get(key, bypass)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(key, error = %err, "Stored value has an unexpected shape");
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        let mut shadow = self.shadow();
        self.backend.write(key, value.to_string())?;
        shadow.insert(key.to_owned(), value);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut shadow = self.shadow();
        self.backend.remove(key)?;
        shadow.remove(key);
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.backend.keys()
    }

    /// Deletes every key starting with `prefix`, returning how many went.
    pub fn delete_prefixed(&self, prefix: &str) -> Result<usize, StoreError> {
        let doomed: Vec<String> = self
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        for key in &doomed {
            self.delete(key)?;
        }
        Ok(doomed.len())
    }

    pub fn clear_shadow(&self) {
        let mut shadow = self.shadow();
        debug!(entries = shadow.len(), "Clearing in-memory cache");
        shadow.clear();
    }

    pub fn credential(&self) -> Option<Credential> {
        let username: String = self.get_as(USERNAME_KEY, false)?;
        let access_token: String = self.get_as(ACCESS_TOKEN_KEY, false)?;
        if username.is_empty() || access_token.is_empty() {
            return None;
        }
        Some(Credential {
            username,
            access_token,
        })
    }

    pub fn save_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        self.set(ACCESS_TOKEN_KEY, &credential.access_token)?;
        self.set(USERNAME_KEY, &credential.username)
    }

    pub fn clear_credential(&self) -> Result<(), StoreError> {
        self.delete(ACCESS_TOKEN_KEY)?;
        self.delete(USERNAME_KEY)
    }

    /// Missing or unreadable watermarks read as the epoch, so everything
    /// counts as newer.
    pub fn watermark(&self, mark: Watermark) -> DateTime<Utc> {
        self.get_as::<i64>(mark.key(), false)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_default()
    }

    pub fn set_watermark(&self, mark: Watermark, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.set(mark.key(), &at.timestamp_millis())
    }

    fn shadow(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.shadow.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HOME environment variable is not set; cannot keep state under ~/.reviewlog")]
    HomeDirMissing,
    #[error("I/O error while handling the store: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize stored value: {0}")]
    Serialization(#[from] serde_json::Error),
}
