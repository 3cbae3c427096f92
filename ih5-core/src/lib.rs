//! # IH5 Core
//!
//! Immutable, patchable container chains with a merged overlay view.
//!
//! A record identifies a logical dataset by a stable UUID. Edits never
//! mutate a committed file; they go into a fresh patch container appended to
//! the chain, so records work on write-once storage while still offering a
//! mutable-looking hierarchical API.
//!
//! This crate provides:
//! - The per-file user block codec and its chain-linking metadata
//! - Qualified payload hashsums for integrity checking
//! - The naming convention and syntactic file discovery
//! - Chain validation (shared UUID, index order, predecessor links,
//!   uniqueness, integrity)
//! - The overlay node model ([`Group`], [`Dataset`], [`AttributeSet`]) with
//!   deletion and substitution markers
//! - The record lifecycle: open modes, create/commit/discard of patches,
//!   and merging a chain into a single container

pub mod error;
pub mod hashsum;
pub mod naming;
pub mod overlay;
pub mod record;
pub mod userblock;

mod chain;

pub use error::{Error, Result};
pub use hashsum::{bytes_hashsum, file_hashsum, hashsum, recompute_like, HashAlg};
pub use overlay::{AttributeSet, Dataset, Group, Node};
pub use record::{OpenMode, Record};
pub use userblock::{UserBlock, FORMAT_MAGIC, USER_BLOCK_SIZE};

pub use ih5_tree::Value;

/// Suffix of manifest sidecar files sitting next to a container.
pub const MANIFEST_FILE_SUFFIX: &str = ".mf.json";
