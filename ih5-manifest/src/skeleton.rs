//! Structural skeletons of records.
//!
//! A skeleton documents the tree structure of a record, ignoring all actual
//! data. Attributes are represented as paths of the shape `a/b@attr` (root
//! attributes as `@attr`), which is why `@` is reserved and rejected in
//! entity names and attribute keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use ih5_core::{Node, Record, Result};

/// Kind of a skeleton entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Group,
    Dataset,
    Attribute,
}

/// One entity of a record: its kind and the patch index of the container
/// that last touched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonEntry {
    pub kind: EntryKind,
    pub patch_index: u64,
}

/// Ordered map from every path (and `path@attr` pseudo-path) of a record to
/// its structural description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Skeleton(pub BTreeMap<String, SkeletonEntry>);

impl Skeleton {
    /// Extract the skeleton of an open record.
    pub fn of_record(record: &Record) -> Result<Skeleton> {
        let meta = record.ih5_meta()?;
        let patch_index_of = |file_idx: usize| meta[file_idx].patch_index;

        let mut entries = BTreeMap::new();

        let root = record.root()?;
        for (name, idx) in root.attrs().indexed_keys()? {
            entries.insert(
                format!("@{name}"),
                SkeletonEntry {
                    kind: EntryKind::Attribute,
                    patch_index: patch_index_of(idx),
                },
            );
        }

        root.visititems(|path, node| {
            let kind = match node {
                Node::Group(_) => EntryKind::Group,
                Node::Dataset(_) => EntryKind::Dataset,
            };
            entries.insert(
                path.to_string(),
                SkeletonEntry {
                    kind,
                    patch_index: patch_index_of(node.creation_index()),
                },
            );
            for (name, idx) in node.attrs().indexed_keys()? {
                entries.insert(
                    format!("{path}@{name}"),
                    SkeletonEntry {
                        kind: EntryKind::Attribute,
                        patch_index: patch_index_of(idx),
                    },
                );
            }
            Ok(())
        })?;

        Ok(Skeleton(entries))
    }

    /// Map of path to entry kind, dropping the patch information.
    pub fn kinds(&self) -> BTreeMap<&str, EntryKind> {
        self.0.iter().map(|(k, e)| (k.as_str(), e.kind)).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&SkeletonEntry> {
        self.0.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SkeletonEntry)> {
        self.0.iter()
    }
}
