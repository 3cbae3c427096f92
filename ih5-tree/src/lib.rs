//! # IH5 Tree Store
//!
//! Single-file hierarchical storage for IH5 containers.
//!
//! This crate provides the storage collaborator consumed by the chain and
//! overlay layers:
//! - A typed [`Value`] model for dataset and attribute payloads, including
//!   an explicit empty value and opaque raw scalars
//! - An in-memory node tree of groups and datasets with attributes
//! - [`TreeFile`]: a file format with a reserved user block prefix, so that
//!   administrative metadata can be rewritten in place without touching the
//!   payload
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ user block <0 or 2^n bytes>  │  reserved, opaque to this crate
//! ├──────────────────────────────┤
//! │ signature <8 bytes>          │
//! ├──────────────────────────────┤
//! │ format version <1 byte>      │
//! ├──────────────────────────────┤
//! │ payload length <u64 LE>      │
//! ├──────────────────────────────┤
//! │ postcard-encoded node tree   │
//! └──────────────────────────────┘
//! ```
//!
//! Readers locate the payload by probing for the signature at offset 0 and
//! then at every power-of-two offset from 512 upward, which doubles as the
//! discovery mechanism for the reserved user block size.

pub mod file;
pub mod node;
pub mod value;

pub use file::{AccessMode, TreeFile, FORMAT_VERSION, TREE_SIGNATURE};
pub use node::{DatasetNode, GroupNode, Node, NodeKind};
pub use value::Value;

use std::path::PathBuf;

/// Result type for tree store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tree store operations
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O failure
    Io(std::io::Error),
    /// No payload signature found at any probed offset
    NotATree(PathBuf),
    /// Payload present but undecodable
    Corrupt(String),
    /// Requested user block size is not 0 or a power of two >= 512
    BadUserBlockSize(u64),
    /// Mutation attempted through a read-only handle
    ReadOnly,
    /// Path does not exist
    NotFound(String),
    /// Path already occupied
    AlreadyExists(String),
    /// A non-terminal path segment is not a group
    NotAGroup(String),
    /// Not a dataset at the given path
    NotADataset(String),
    /// Empty path or empty path segment
    InvalidPath(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "i/o error: {e}"),
            Error::NotATree(p) => write!(f, "{}: no tree store signature found", p.display()),
            Error::Corrupt(msg) => write!(f, "corrupt tree payload: {msg}"),
            Error::BadUserBlockSize(n) => {
                write!(f, "invalid user block size {n}, must be 0 or a power of two >= 512")
            }
            Error::ReadOnly => write!(f, "tree file is opened read-only"),
            Error::NotFound(p) => write!(f, "'{p}' does not exist"),
            Error::AlreadyExists(p) => write!(f, "'{p}' already exists"),
            Error::NotAGroup(p) => write!(f, "'{p}' is not a group"),
            Error::NotADataset(p) => write!(f, "'{p}' is not a dataset"),
            Error::InvalidPath(p) => write!(f, "invalid path: '{p}'"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
