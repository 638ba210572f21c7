//! Typed errors at the library's public boundaries.
//!
//! Internal plumbing still threads `anyhow::Result`/`anyhow::Context` the
//! way the rest of this codebase does; the public operations (`cd`,
//! `find`, ingestion, BSR synthesis, session transitions, serializer
//! load, ...) convert to this enum at their public edge. The Selection
//! Engine is the only component that renders these to a human string
//! (see [`crate::selection::Selection::error_string`]); everyone else
//! matches on the structured variant.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed catalog row: {0}")]
    MalformedRow(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("catalog error: {0}")]
    CatalogError(String),

    #[error("no files selected")]
    NoFilesSelected,

    #[error("no volumes found for the selected jobs")]
    NoVolumes,

    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    #[error("wrong session state: expected {expected}, found {found}")]
    WrongState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
