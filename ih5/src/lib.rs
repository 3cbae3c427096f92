//! # IH5
//!
//! Immutable, patchable containers with a merged overlay view.
//!
//! A record is a chain of container files: one base plus any number of
//! patches, linked by UUIDs in a reserved user block at the start of each
//! file. Committed files are never modified again (their payload hashsum is
//! checked on every open), so records work on write-once and append-only
//! storage while still presenting a mutable-looking hierarchical tree of
//! groups, datasets and attributes.
//!
//! ```no_run
//! use ih5::{OpenMode, Record};
//!
//! # fn main() -> ih5::Result<()> {
//! // create a record and commit the base container
//! let mut rec = Record::create("measurements")?;
//! rec.set("run1/temperature", vec![293.1, 293.4, 293.2])?;
//! rec.attrs()?.set("operator", "jdoe")?;
//! rec.close(true)?;
//!
//! // later (possibly on read-only storage for the base): patch it
//! let mut rec = Record::open("measurements", OpenMode::ReadWrite)?;
//! rec.set("run2/temperature", vec![290.0, 290.7])?;
//! rec.delete("run1/temperature")?;
//! rec.close(true)?; // appends measurements.p1.ih5, the base is untouched
//! # Ok(())
//! # }
//! ```
//!
//! The manifest layer ([`MfRecord`]) additionally maintains a JSON sidecar
//! with the record's structural skeleton, enabling *stubs*: structurally
//! identical but data-free base containers against which patches can be
//! authored remotely and later applied to the real record.

pub use ih5_core::{
    bytes_hashsum, file_hashsum, hashsum, naming, AttributeSet, Dataset, Error, Group, HashAlg,
    Node, OpenMode, Record, Result, UserBlock, Value, FORMAT_MAGIC, MANIFEST_FILE_SUFFIX,
    USER_BLOCK_SIZE,
};

pub use ih5_manifest::{
    init_stub_base, init_stub_skeleton, EntryKind, Manifest, MfRecord, Skeleton, SkeletonEntry,
    UbExtManifest, UB_EXT_NAME,
};

/// The storage layer (single-file tree stores with a reserved user block).
pub mod tree {
    pub use ih5_tree::{AccessMode, DatasetNode, GroupNode, Node, NodeKind, TreeFile, Value};
}
