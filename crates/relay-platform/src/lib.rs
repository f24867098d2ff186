//! Host storage abstractions for the event-delivery runtime.
//!
//! Two seams are exposed: a small key/value surface for flags and
//! identifiers, and a record surface for whole-document payloads such as
//! the pending-event list and registration backups. Both are scoped so a
//! host can keep shared state (visible to app extensions) apart from
//! private state.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("value not found")]
    NotFound,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Visibility scope of a stored value or record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Visible to the host application and its extensions.
    Shared,
    /// Visible to the host application only.
    Private,
}

impl StorageScope {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Private => "private",
        }
    }
}

/// Small scoped key/value surface for flags and identifiers.
pub trait KeyValueStorage: Send + Sync {
    fn set_value(&self, scope: StorageScope, key: &str, value: &str)
    -> Result<(), StorageError>;

    fn get_value(&self, scope: StorageScope, key: &str) -> Result<String, StorageError>;

    fn remove_value(&self, scope: StorageScope, key: &str) -> Result<(), StorageError>;
}

/// Whole-document record surface for payloads rewritten in full.
pub trait RecordStorage: Send + Sync {
    fn save_record(&self, scope: StorageScope, name: &str, body: &str)
    -> Result<(), StorageError>;

    fn load_record(&self, scope: StorageScope, name: &str) -> Result<String, StorageError>;

    fn delete_record(&self, scope: StorageScope, name: &str) -> Result<(), StorageError>;
}

/// In-memory storage used by tests and by hosts without a durable layer.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    values: Arc<RwLock<HashMap<(StorageScope, String), String>>>,
    records: Arc<RwLock<HashMap<(StorageScope, String), String>>>,
}

impl KeyValueStorage for InMemoryStorage {
    fn set_value(
        &self,
        scope: StorageScope,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        let mut values = self
            .values
            .write()
            .map_err(|_| StorageError::Backend("poisoned lock".to_owned()))?;
        values.insert((scope, key.to_owned()), value.to_owned());
        Ok(())
    }

    fn get_value(&self, scope: StorageScope, key: &str) -> Result<String, StorageError> {
        let values = self
            .values
            .read()
            .map_err(|_| StorageError::Backend("poisoned lock".to_owned()))?;
        values
            .get(&(scope, key.to_owned()))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn remove_value(&self, scope: StorageScope, key: &str) -> Result<(), StorageError> {
        let mut values = self
            .values
            .write()
            .map_err(|_| StorageError::Backend("poisoned lock".to_owned()))?;
        if values.remove(&(scope, key.to_owned())).is_none() {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

impl RecordStorage for InMemoryStorage {
    fn save_record(
        &self,
        scope: StorageScope,
        name: &str,
        body: &str,
    ) -> Result<(), StorageError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::Backend("poisoned lock".to_owned()))?;
        records.insert((scope, name.to_owned()), body.to_owned());
        Ok(())
    }

    fn load_record(&self, scope: StorageScope, name: &str) -> Result<String, StorageError> {
        let records = self
            .records
            .read()
            .map_err(|_| StorageError::Backend("poisoned lock".to_owned()))?;
        records
            .get(&(scope, name.to_owned()))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn delete_record(&self, scope: StorageScope, name: &str) -> Result<(), StorageError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::Backend("poisoned lock".to_owned()))?;
        if records.remove(&(scope, name.to_owned())).is_none() {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

/// File-backed storage rooted at a host-provided directory.
///
/// Records are one file per name under `shared/` or `private/`; key/value
/// pairs live in one JSON map file per scope, rewritten on every mutation.
#[derive(Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scope_dir(&self, scope: StorageScope) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(scope.dir_name());
        fs::create_dir_all(&dir).map_err(map_io)?;
        Ok(dir)
    }

    fn values_path(&self, scope: StorageScope) -> Result<PathBuf, StorageError> {
        Ok(self.scope_dir(scope)?.join("values.json"))
    }

    fn read_values(&self, scope: StorageScope) -> Result<HashMap<String, String>, StorageError> {
        let path = self.values_path(scope)?;
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|err| StorageError::Backend(err.to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(map_io(err)),
        }
    }

    fn write_values(
        &self,
        scope: StorageScope,
        values: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(values)
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        fs::write(self.values_path(scope)?, raw).map_err(map_io)
    }

    fn record_path(&self, scope: StorageScope, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.contains(['/', '\\']) || Path::new(name).is_absolute() {
            return Err(StorageError::Backend(format!(
                "illegal record name '{name}'"
            )));
        }
        Ok(self.scope_dir(scope)?.join(name))
    }
}

impl KeyValueStorage for FileStorage {
    fn set_value(
        &self,
        scope: StorageScope,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        let mut values = self.read_values(scope)?;
        values.insert(key.to_owned(), value.to_owned());
        self.write_values(scope, &values)
    }

    fn get_value(&self, scope: StorageScope, key: &str) -> Result<String, StorageError> {
        self.read_values(scope)?
            .remove(key)
            .ok_or(StorageError::NotFound)
    }

    fn remove_value(&self, scope: StorageScope, key: &str) -> Result<(), StorageError> {
        let mut values = self.read_values(scope)?;
        if values.remove(key).is_none() {
            return Err(StorageError::NotFound);
        }
        self.write_values(scope, &values)
    }
}

impl RecordStorage for FileStorage {
    fn save_record(
        &self,
        scope: StorageScope,
        name: &str,
        body: &str,
    ) -> Result<(), StorageError> {
        fs::write(self.record_path(scope, name)?, body).map_err(map_io)
    }

    fn load_record(&self, scope: StorageScope, name: &str) -> Result<String, StorageError> {
        match fs::read_to_string(self.record_path(scope, name)?) {
            Ok(body) => Ok(body),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(err) => Err(map_io(err)),
        }
    }

    fn delete_record(&self, scope: StorageScope, name: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.record_path(scope, name)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(err) => Err(map_io(err)),
        }
    }
}

fn map_io(err: io::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}
