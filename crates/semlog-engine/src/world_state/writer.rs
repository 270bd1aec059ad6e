//! World-state writers: the `init / write / finish` contract and its two
//! backends.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::document::{world_state_indexes, WorldStateDocument};
use super::store::{DocumentStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("output file {path} already exists and overwrite is disabled")]
    FileExists { path: PathBuf },

    #[error("collection {database}.{collection} already exists and overwrite is disabled")]
    CollectionExists { database: String, collection: String },

    #[error("document store unreachable: {0}")]
    Unreachable(#[source] StoreError),

    #[error("no document store configured for the store writer")]
    NoStore,

    #[error("world state worker stopped unexpectedly")]
    WorkerGone,

    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    #[error("writer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Backend selected at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterKind {
    /// JSON-lines file per episode.
    #[default]
    Json,
    /// Document store collection with indexes.
    Store,
}

/// Persists world-state documents. Construction is `init`.
pub trait WorldStateWriter: Send {
    fn write(&mut self, document: &WorldStateDocument) -> Result<(), WriterError>;

    /// Flush buffers and create indexes. Called once.
    fn finish(&mut self) -> Result<(), WriterError>;

    fn written(&self) -> u64;
}

// ---------------------------------------------------------------------------
// JsonWriter
// ---------------------------------------------------------------------------

/// Appends one JSON document per line to `<dir>/<task>/<episode>_ws.json`.
#[derive(Debug)]
pub struct JsonWriter {
    path: PathBuf,
    out: BufWriter<File>,
    written: u64,
}

impl JsonWriter {
    pub fn create(dir: &Path, task_id: &str, episode_id: &str, overwrite: bool) -> Result<Self, WriterError> {
        let path = Self::path_for(dir, task_id, episode_id);
        if path.exists() && !overwrite {
            return Err(WriterError::FileExists { path });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let out = BufWriter::new(File::create(&path)?);
        tracing::info!(path = %path.display(), "world state json writer ready");
        Ok(Self {
            path,
            out,
            written: 0,
        })
    }

    pub fn path_for(dir: &Path, task_id: &str, episode_id: &str) -> PathBuf {
        dir.join(task_id).join(format!("{episode_id}_ws.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorldStateWriter for JsonWriter {
    fn write(&mut self, document: &WorldStateDocument) -> Result<(), WriterError> {
        serde_json::to_writer(&mut self.out, document)?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        self.out.flush()?;
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }
}

// ---------------------------------------------------------------------------
// StoreWriter
// ---------------------------------------------------------------------------

/// Inserts documents into `<database>.<episode>_ws` and indexes the
/// collection at finish.
pub struct StoreWriter {
    store: Box<dyn DocumentStore>,
    database: String,
    collection: String,
    written: u64,
}

impl std::fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWriter")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("written", &self.written)
            .finish()
    }
}

impl StoreWriter {
    /// Connect and prepare the collection.
    ///
    /// An existing collection is dropped when `overwrite` is set; otherwise
    /// initialization fails without touching it.
    pub fn connect(
        mut store: Box<dyn DocumentStore>,
        database: &str,
        episode_id: &str,
        overwrite: bool,
    ) -> Result<Self, WriterError> {
        store.ping().map_err(WriterError::Unreachable)?;
        let collection = format!("{episode_id}_ws");
        if store.has_collection(database, &collection)? {
            if !overwrite {
                return Err(WriterError::CollectionExists {
                    database: database.to_owned(),
                    collection,
                });
            }
            tracing::warn!(database, collection = %collection, "dropping existing world state collection");
            store.drop_collection(database, &collection)?;
        }
        store.create_collection(database, &collection)?;
        tracing::info!(database, collection = %collection, "world state store writer ready");
        Ok(Self {
            store,
            database: database.to_owned(),
            collection,
            written: 0,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl WorldStateWriter for StoreWriter {
    fn write(&mut self, document: &WorldStateDocument) -> Result<(), WriterError> {
        let value = serde_json::to_value(document)?;
        self.store
            .insert_one(&self.database, &self.collection, &value)?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        self.store
            .create_indexes(&self.database, &self.collection, &world_state_indexes())?;
        tracing::debug!(collection = %self.collection, documents = self.written, "world state indexes created");
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Where a writer puts its output.
pub struct WriterTarget<'a> {
    pub kind: WriterKind,
    pub output_dir: &'a Path,
    pub task_id: &'a str,
    pub episode_id: &'a str,
    pub database: &'a str,
    pub overwrite: bool,
}

/// Build the writer chosen by `target.kind`. `store` is consumed by the
/// store backend and ignored by the JSON one.
pub fn create_writer(
    target: &WriterTarget<'_>,
    store: Option<Box<dyn DocumentStore>>,
) -> Result<Box<dyn WorldStateWriter>, WriterError> {
    match target.kind {
        WriterKind::Json => Ok(Box::new(JsonWriter::create(
            target.output_dir,
            target.task_id,
            target.episode_id,
            target.overwrite,
        )?)),
        WriterKind::Store => {
            let store = store.ok_or(WriterError::NoStore)?;
            Ok(Box::new(StoreWriter::connect(
                store,
                target.database,
                target.episode_id,
                target.overwrite,
            )?))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
