//! Storage backends for the AI Chat Studio access engine.
//!
//! Collections are stored as flat JSON arrays, one object per collection,
//! on an in-memory or filesystem backend.

pub mod error;
pub mod backend;
pub mod persistence;

pub use error::{StorageError, StorageResult};
pub use backend::StorageBackend;
pub use backend::memory::InMemoryBackend;
pub use backend::filesystem::FilesystemBackend;
pub use persistence::JsonPersistence;
