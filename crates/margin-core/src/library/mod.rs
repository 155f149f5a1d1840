//! Library catalog boundary and lookup index
//!
//! The catalog itself belongs to the host application; this module defines
//! the narrow interface margin needs from it (`Catalog`) and the cached
//! lookup maps built over a catalog snapshot (`IndexHandle`).
//!
//! ## Index lifecycle
//!
//! - Built lazily on the first match of a pass
//! - Reused while the catalog reports the same modification token and
//!   library identity
//! - Rebuilt wholesale otherwise; concurrent callers join the in-flight build

mod catalog;
mod index;

pub use catalog::{
    Catalog, CatalogError, FileCatalog, MemoryCatalog, ModificationToken, TargetLocks,
};
pub use index::{IndexHandle, LibraryIndexer, TitleRecord, UuidRecord};
