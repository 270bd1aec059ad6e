//! World-state logging: sampler, document model, writers and the
//! background worker.

pub mod document;
pub mod sampler;
pub mod store;
pub mod worker;
pub mod writer;

pub use document::{IndexKey, WorldStateDocument};
pub use sampler::{PoseSource, SampleFrame, WorldStateSampler};
pub use store::{DocumentStore, FileStore, MemoryStore, StoreError};
pub use worker::{LoggerStats, WorldStateLogger, WriteOutcome};
pub use writer::{create_writer, WorldStateWriter, WriterError, WriterKind, WriterTarget};
