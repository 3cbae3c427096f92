//! # IH5 Manifest
//!
//! Manifest sidecars, structural skeletons and stub containers for IH5
//! records.
//!
//! The manifest mechanism captures the structural skeleton of a container
//! chain in a JSON sidecar file, bound to the newest container by a hashsum
//! embedded in its user block. With only the sidecar at hand, a remote
//! party can create a *stub*: a base container mirroring the original
//! structure without any data, on top of which patches can be authored that
//! apply cleanly to the real record.
//!
//! This crate provides:
//! - [`Skeleton`]: extraction of the structural map of a record
//! - [`init_stub_skeleton`] / [`init_stub_base`]: stub initialization
//! - [`Manifest`] and the `ih5mf_v01` user block extension
//! - [`MfRecord`]: the manifest-aware record variant

pub mod manifest;
pub mod mf_record;
pub mod skeleton;
pub mod stub;

pub use manifest::{Manifest, UbExtManifest, UB_EXT_NAME};
pub use mf_record::MfRecord;
pub use skeleton::{EntryKind, Skeleton, SkeletonEntry};
pub use stub::{init_stub_base, init_stub_skeleton};
