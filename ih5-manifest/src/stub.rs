//! Stub containers: structural clones of a record without its data.
//!
//! A stub base container mirrors the tree of another record (as recorded in
//! a skeleton) using empty values only, and carries the identity of that
//! record in its user block. Patches created on top of the stub are
//! compatible with the real record, because the chain-linking metadata
//! matches.

use ih5_core::{Error, Record, Result, UserBlock};
use ih5_tree::Value;

use crate::skeleton::{EntryKind, Skeleton};

/// Fill a fresh, empty record with the structure described by a skeleton.
///
/// Entry replay is order-independent: map ordering yields parents before
/// children, and a dataset entry tolerates an empty dataset pre-created by
/// one of its attribute entries.
pub fn init_stub_skeleton(record: &mut Record, skeleton: &Skeleton) -> Result<()> {
    if !record.is_empty()? {
        return Err(Error::Lifecycle(
            "container not empty, cannot initialize stub structure here".to_string(),
        ));
    }

    for (path, entry) in skeleton.iter() {
        match entry.kind {
            EntryKind::Group => {
                if !record.contains(path)? {
                    record.create_group(path)?;
                }
            }
            EntryKind::Dataset => {
                if !record.contains(path)? {
                    record.set(path, Value::Empty)?;
                }
            }
            EntryKind::Attribute => {
                let (node_path, attr) = path
                    .split_once('@')
                    .ok_or_else(|| Error::InvalidKey(path.clone()))?;
                let node_path = if node_path.is_empty() { "/" } else { node_path };
                if !record.contains(node_path)? {
                    record.set(node_path, Value::Empty)?;
                }
                record.get(node_path)?.attrs().set(attr, Value::Empty)?;
            }
        }
    }
    Ok(())
}

/// Prepare a stub base container: replay the skeleton into the empty
/// `record`, imprint the source identity (with no predecessor link) and
/// commit, so the stub cannot be modified accidentally.
pub fn init_stub_base(record: &mut Record, src_ub: &UserBlock, skeleton: &Skeleton) -> Result<()> {
    init_stub_skeleton(record, skeleton)?;
    let mut ub = src_ub.clone();
    ub.prev_patch = None;
    record.set_tail_userblock(ub)?;
    record.commit_patch()
}
