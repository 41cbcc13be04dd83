// src/error.rs

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::format::SampleFormat;

/// Failures an editing operation can report.
///
/// Splicing chunks of different sample formats is a caller bug and trips an
/// assertion in the chunk layer. `Incompatible` is the document layer
/// refusing such a request before it gets that far.
#[derive(Error, Debug)]
pub enum EditError {
    /// A backing store could not be opened for reading.
    #[error("could not open {path}: {reason}")]
    BackendOpen { path: String, reason: String },

    /// A backend delivered fewer frames than the range it was asked for.
    #[error("short read at frame {start}: wanted {wanted} frames, got {got}")]
    ReadShortfall { start: u64, wanted: usize, got: usize },

    /// A decoder failed in the middle of a stream.
    #[error("decoding {path} failed: {reason}")]
    Decode { path: String, reason: String },

    /// Writing ran out of space.
    #[error("disk full while writing {}", path.display())]
    DiskFull { path: PathBuf },

    /// Any other write failure.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A clip does not share the document's sample format.
    #[error("cannot combine {found} audio with a {expected} document")]
    Incompatible {
        expected: SampleFormat,
        found: SampleFormat,
    },

    /// The caller asked the operation to stop.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl EditError {
    /// Classify a write error, separating a full disk from everything else.
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::StorageFull {
            EditError::DiskFull { path }
        } else {
            EditError::Write { path, source }
        }
    }

    pub fn backend_open(path: impl Into<String>, reason: impl ToString) -> Self {
        EditError::BackendOpen {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_disk_full(&self) -> bool {
        matches!(self, EditError::DiskFull { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EditError::Cancelled)
    }
}

/// Result type for editing operations
pub type EditResult<T> = Result<T, EditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_full_maps_to_disk_full() {
        let err = EditError::write("/tmp/x.wav", io::Error::from(io::ErrorKind::StorageFull));
        assert!(err.is_disk_full());

        let err = EditError::write("/tmp/x.wav", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, EditError::Write { .. }));
        assert!(!err.is_disk_full());
    }
}
