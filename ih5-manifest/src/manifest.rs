//! Manifest sidecar files and their user block extension.
//!
//! A manifest is a JSON sidecar next to the newest container of a chain. It
//! carries the tail user block, the record skeleton and an arbitrary
//! extension bag, which is enough to author new patches without the data
//! files themselves. The tail user block in turn embeds the manifest UUID
//! and hashsum, binding the sidecar to the file it describes.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ih5_core::{
    bytes_hashsum, Error, HashAlg, Result, UserBlock, MANIFEST_FILE_SUFFIX,
};

use crate::skeleton::Skeleton;

/// Name of the user block extension section carrying manifest info.
pub const UB_EXT_NAME: &str = "ih5mf_v01";

/// Sidecar metadata for a chain of record containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// UUID of this manifest instance (the sidecar filename is irrelevant)
    pub manifest_uuid: Uuid,

    /// Copy of the tail user block, without its own manifest extension
    pub user_block: UserBlock,

    /// Skeleton of the record, for creating stubs
    pub skeleton: Skeleton,

    /// Arbitrary extension data, inherited across patches until overridden
    pub manifest_exts: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    /// Create a fresh manifest from a user block and skeleton. The manifest
    /// extension section is stripped from the embedded user block copy to
    /// avoid self-reference.
    pub fn from_userblock(
        ub: &UserBlock,
        skeleton: Skeleton,
        exts: BTreeMap<String, serde_json::Value>,
    ) -> Manifest {
        let mut ub_copy = ub.clone();
        ub_copy.ub_exts.remove(UB_EXT_NAME);
        Manifest {
            manifest_uuid: Uuid::new_v4(),
            user_block: ub_copy,
            skeleton,
            manifest_exts: exts,
        }
    }

    /// Canonical sidecar path for a container file.
    pub fn sidecar_path(container: &Path) -> PathBuf {
        let mut s = container.as_os_str().to_os_string();
        s.push(MANIFEST_FILE_SUFFIX);
        PathBuf::from(s)
    }

    /// Serialized form: UTF-8 JSON terminated by a newline.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = serde_json::to_vec_pretty(self).map_err(|e| Error::ManifestMismatch {
            path: PathBuf::new(),
            reason: format!("serialization failed: {e}"),
        })?;
        data.push(b'\n');
        Ok(data)
    }

    /// Qualified hashsum of the serialized manifest.
    pub fn hashsum(&self) -> Result<String> {
        bytes_hashsum(&self.to_bytes()?, HashAlg::default())
    }

    /// Write the manifest to a sidecar file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut f = std::fs::File::create(path)?;
        f.write_all(&self.to_bytes()?)?;
        f.flush()?;
        Ok(())
    }

    /// Load a manifest from a sidecar file.
    pub fn load(path: &Path) -> Result<Manifest> {
        let data = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::ManifestMismatch {
                path: path.to_path_buf(),
                reason: "manifest file does not exist".to_string(),
            },
            _ => Error::Io(e),
        })?;
        serde_json::from_slice(&data).map_err(|e| Error::ManifestMismatch {
            path: path.to_path_buf(),
            reason: format!("malformed manifest: {e}"),
        })
    }
}

/// User block extension section for stub and manifest support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UbExtManifest {
    /// True if the file mirrors the structure of another container chain
    /// without its data
    pub is_stub_container: bool,

    /// UUID of the manifest belonging to this container
    pub manifest_uuid: Uuid,

    /// Qualified hashsum of the manifest sidecar bytes
    pub manifest_hashsum: String,
}

impl UbExtManifest {
    /// Parse the extension from a user block, if present.
    pub fn get(ub: &UserBlock) -> Result<Option<UbExtManifest>> {
        match ub.ub_exts.get(UB_EXT_NAME) {
            None => Ok(None),
            Some(raw) => serde_json::from_value(raw.clone())
                .map(Some)
                .map_err(|e| Error::CorruptUserBlock {
                    path: PathBuf::new(),
                    reason: format!("malformed {UB_EXT_NAME} extension: {e}"),
                }),
        }
    }

    /// Create or overwrite the extension section in a user block.
    pub fn update(&self, ub: &mut UserBlock) {
        let raw = serde_json::to_value(self).expect("extension serializes to plain JSON");
        ub.ub_exts.insert(UB_EXT_NAME.to_string(), raw);
    }
}
