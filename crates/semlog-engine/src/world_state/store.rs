//! Document stores backing the store writer.
//!
//! A [`DocumentStore`] is a minimal database/collection interface:
//! connectivity check, collection lifecycle, single-document inserts and
//! index creation. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: shared in-process store, cheap to clone and inspect.
//!   Can be taken offline to exercise failure paths.
//! - [`FileStore`]: one directory per database, one JSON-lines file per
//!   collection plus an `<collection>.indexes.json` sidecar.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use super::document::IndexKey;

// ---------------------------------------------------------------------------
// Error / trait
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("collection {database}.{collection} does not exist")]
    MissingCollection { database: String, collection: String },

    #[error("collection {database}.{collection} already exists")]
    CollectionExists { database: String, collection: String },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait DocumentStore: Send {
    /// Check that the store is reachable.
    fn ping(&mut self) -> Result<(), StoreError>;

    fn has_collection(&self, database: &str, collection: &str) -> Result<bool, StoreError>;

    fn drop_collection(&mut self, database: &str, collection: &str) -> Result<(), StoreError>;

    /// Create an empty collection. Fails if it already exists.
    fn create_collection(&mut self, database: &str, collection: &str) -> Result<(), StoreError>;

    fn insert_one(&mut self, database: &str, collection: &str, document: &Value) -> Result<(), StoreError>;

    fn create_indexes(&mut self, database: &str, collection: &str, indexes: &[IndexKey]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryCollection {
    pub documents: Vec<Value>,
    pub indexes: Vec<IndexKey>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    collections: HashMap<(String, String), MemoryCollection>,
    offline: bool,
    failing_inserts: u32,
}

/// In-process store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Make every operation fail as unreachable.
    pub fn set_offline(&self, offline: bool) -> Result<(), StoreError> {
        self.lock()?.offline = offline;
        Ok(())
    }

    /// Make the next `count` inserts fail.
    pub fn fail_next_inserts(&self, count: u32) -> Result<(), StoreError> {
        self.lock()?.failing_inserts = count;
        Ok(())
    }

    /// Copy of a collection's contents.
    pub fn collection(&self, database: &str, collection: &str) -> Option<MemoryCollection> {
        self.lock()
            .ok()?
            .collections
            .get(&(database.to_owned(), collection.to_owned()))
            .cloned()
    }

    fn online(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
        let guard = self.lock()?;
        if guard.offline {
            return Err(StoreError::Unreachable("memory store is offline".into()));
        }
        Ok(guard)
    }
}

fn key(database: &str, collection: &str) -> (String, String) {
    (database.to_owned(), collection.to_owned())
}

fn missing(database: &str, collection: &str) -> StoreError {
    StoreError::MissingCollection {
        database: database.to_owned(),
        collection: collection.to_owned(),
    }
}

impl DocumentStore for MemoryStore {
    fn ping(&mut self) -> Result<(), StoreError> {
        self.online().map(|_| ())
    }

    fn has_collection(&self, database: &str, collection: &str) -> Result<bool, StoreError> {
        Ok(self
            .online()?
            .collections
            .contains_key(&key(database, collection)))
    }

    fn drop_collection(&mut self, database: &str, collection: &str) -> Result<(), StoreError> {
        self.online()?.collections.remove(&key(database, collection));
        Ok(())
    }

    fn create_collection(&mut self, database: &str, collection: &str) -> Result<(), StoreError> {
        let mut inner = self.online()?;
        let k = key(database, collection);
        if inner.collections.contains_key(&k) {
            return Err(StoreError::CollectionExists {
                database: k.0,
                collection: k.1,
            });
        }
        inner.collections.insert(k, MemoryCollection::default());
        Ok(())
    }

    fn insert_one(&mut self, database: &str, collection: &str, document: &Value) -> Result<(), StoreError> {
        let mut inner = self.online()?;
        if inner.failing_inserts > 0 {
            inner.failing_inserts -= 1;
            return Err(StoreError::Unreachable("insert rejected".into()));
        }
        inner
            .collections
            .get_mut(&key(database, collection))
            .ok_or_else(|| missing(database, collection))?
            .documents
            .push(document.clone());
        Ok(())
    }

    fn create_indexes(&mut self, database: &str, collection: &str, indexes: &[IndexKey]) -> Result<(), StoreError> {
        let mut inner = self.online()?;
        let coll = inner
            .collections
            .get_mut(&key(database, collection))
            .ok_or_else(|| missing(database, collection))?;
        for index in indexes {
            if !coll.indexes.contains(index) {
                coll.indexes.push(index.clone());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Directory-backed store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_path(&self, database: &str, collection: &str) -> PathBuf {
        self.root.join(database).join(format!("{collection}.jsonl"))
    }

    pub fn index_path(&self, database: &str, collection: &str) -> PathBuf {
        self.root
            .join(database)
            .join(format!("{collection}.indexes.json"))
    }

    /// Read every document of a collection back.
    pub fn read_collection(&self, database: &str, collection: &str) -> Result<Vec<Value>, StoreError> {
        let path = self.collection_path(database, collection);
        if !path.exists() {
            return Err(missing(database, collection));
        }
        fs::read_to_string(path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(StoreError::from))
            .collect()
    }
}

impl DocumentStore for FileStore {
    fn ping(&mut self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)
            .map_err(|e| StoreError::Unreachable(format!("{}: {e}", self.root.display())))
    }

    fn has_collection(&self, database: &str, collection: &str) -> Result<bool, StoreError> {
        Ok(self.collection_path(database, collection).exists())
    }

    fn drop_collection(&mut self, database: &str, collection: &str) -> Result<(), StoreError> {
        for path in [
            self.collection_path(database, collection),
            self.index_path(database, collection),
        ] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn create_collection(&mut self, database: &str, collection: &str) -> Result<(), StoreError> {
        let path = self.collection_path(database, collection);
        if path.exists() {
            return Err(StoreError::CollectionExists {
                database: database.to_owned(),
                collection: collection.to_owned(),
            });
        }
        fs::create_dir_all(self.root.join(database))?;
        fs::File::create(path)?;
        Ok(())
    }

    fn insert_one(&mut self, database: &str, collection: &str, document: &Value) -> Result<(), StoreError> {
        let path = self.collection_path(database, collection);
        if !path.exists() {
            return Err(missing(database, collection));
        }
        let mut file = OpenOptions::new().append(true).open(path)?;
        let mut line = serde_json::to_vec(document)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    fn create_indexes(&mut self, database: &str, collection: &str, indexes: &[IndexKey]) -> Result<(), StoreError> {
        if !self.has_collection(database, collection)? {
            return Err(missing(database, collection));
        }
        let path = self.index_path(database, collection);
        let mut existing: Vec<IndexKey> = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        for index in indexes {
            if !existing.contains(index) {
                existing.push(index.clone());
            }
        }
        fs::write(path, serde_json::to_vec_pretty(&existing)?)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
