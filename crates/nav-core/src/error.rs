//! Error kinds shared by every `nav-core` component.
//!
//! None of these abort the process (see the propagation rule: no panics, no
//! exceptions across the API boundary). Callers decide retry/abort policy.

use thiserror::Error;

/// Unified error type for coordinate packing, registry access, and blob I/O.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NavError {
    /// A coordinate exceeds its representable range (section axis outside
    /// `[-512, 511]`, or a Morton axis outside its bit budget).
    #[error("coordinate out of range: {0}")]
    OutOfRange(String),

    /// Registry asked to acquire type `T` whose stride differs from the one
    /// already registered under that type id.
    #[error("registry type mismatch: expected stride {expected}, got {actual}")]
    TypeMismatch { expected: usize, actual: usize },

    /// Registry `acquire_*` by key for a key that was never `register_key`'d.
    #[error("registry key not found")]
    KeyNotFound,

    /// Blob header version is not the one this reader supports.
    #[error("blob version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// Blob failed in-place validation (size, pointer range, lookup/morton
    /// agreement, or similar structural check).
    #[error("corrupt blob: {0}")]
    CorruptBlob(String),

    /// Backing bytes for a resource key could not be read.
    #[error("asset io error: {0}")]
    AssetIoError(String),

    /// Acquire returned a handle whose `IsAccessible` is false — a writer
    /// holds intent or the exclusive lock.
    #[error("registry slot inaccessible")]
    Inaccessible,

    /// A writer could not promote `WRITE_INTENT` to `WRITE_LOCK` within its
    /// policy bound; the mutation was not applied.
    #[error("writer could not acquire exclusive lock")]
    RaceAborted,
}

pub type Result<T> = std::result::Result<T, NavError>;
