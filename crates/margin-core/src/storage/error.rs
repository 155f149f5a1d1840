//! Storage errors
//!
//! Failures of the annotation database and of whole-file writes. I/O
//! failures are sorted by cause so the CLI can tell people what to do.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// ENOSPC on Linux and macOS
const NO_SPACE_OS_ERROR: i32 = 28;

/// Errors raised by the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cannot create directory {path:?}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No permission to write {path:?}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of disk space while writing {path:?}")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The temp file was written but could not replace the target
    #[error("Could not replace {to:?} with {from:?}: {source}")]
    Replace {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A stored row could not be decoded
    #[error("Stored annotation for {reader_app}/{book_id} is unreadable: {details}")]
    CorruptRow {
        reader_app: String,
        book_id: String,
        details: String,
    },

    #[error("Annotation database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StorageError {
    /// Wrap an I/O error on `path`, sorted by cause
    pub fn from_io(source: io::Error, path: PathBuf) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            StorageError::PermissionDenied { path, source }
        } else if is_out_of_space(&source) {
            StorageError::DiskFull { path, source }
        } else {
            StorageError::Io { path, source }
        }
    }

    /// What the user can do about it, when there is something to do
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => {
                Some("Free some disk space and run the command again.")
            }
            StorageError::PermissionDenied { .. } | StorageError::CreateDirectory { .. } => {
                Some("Check that margin's data directory is writable, or point data_dir elsewhere.")
            }
            StorageError::CorruptRow { .. } => {
                Some("Run `margin fetch` for that reader app to replace the stored annotations.")
            }
            _ => None,
        }
    }
}

fn is_out_of_space(error: &io::Error) -> bool {
    if error.raw_os_error() == Some(NO_SPACE_OS_ERROR) {
        return true;
    }
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left") || msg.contains("quota exceeded")
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
