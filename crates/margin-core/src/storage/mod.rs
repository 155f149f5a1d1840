//! Storage layer
//!
//! Persists raw annotation entries fetched from reader apps.
//!
//! ## Architecture
//!
//! - **SQLite**: one row per `(reader_app, book_id, identity_key)`, with the
//!   time it was fetched
//! - **Atomic files**: whole-file writes go through a temp file and rename

pub mod annotation_store;
pub mod error;
pub mod persistence;
pub mod schema;

pub use annotation_store::{AnnotationStore, BookSummary};
pub use error::{StorageError, StorageResult};
pub use persistence::atomic_write;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
