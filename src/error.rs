//! Error kinds for the problem-directory store.
//!
//! The protocol this crate implements used to overload a thread-local
//! errno to tell failure kinds apart (see the design notes). Here every
//! fallible operation instead returns one of these variants directly.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// All failure kinds a caller of this crate can observe.
#[derive(Debug, Error)]
pub enum DumpDirError {
    /// The directory lacks a well-formed `time` item after the opener's
    /// retry budget was exhausted.
    #[error("'{0}' is not a problem directory")]
    NotADumpDir(PathBuf),

    /// The target path does not exist (or a parent component isn't a
    /// directory).
    #[error("'{0}' does not exist")]
    MissingPath(PathBuf),

    /// The lock could not be acquired because the directory is not
    /// writable by the caller.
    #[error("permission denied locking '{0}'")]
    PermissionDenied(PathBuf),

    /// A caller-supplied item name failed validation (contains `/`,
    /// is `.`/`..`, is empty, or contains a control character).
    #[error("invalid item name '{0}'")]
    InvalidName(String),

    /// A mutating operation was attempted on a handle that doesn't hold
    /// the lock. Treated as a programmer bug by callers.
    #[error("operation requires a locked dump directory")]
    BadLockState,

    /// The local process already holds this directory's lock (a second
    /// acquire attempt by the same pid).
    #[error("lock on '{0}' is already held by this process")]
    LockedBySelf(PathBuf),

    /// Any other filesystem error.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DumpDirError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DumpDirError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn from_nix(path: impl Into<PathBuf>, err: nix::Error) -> Self {
        DumpDirError::Io {
            path: path.into(),
            source: io::Error::from(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, DumpDirError>;
