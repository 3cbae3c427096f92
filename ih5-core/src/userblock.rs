//! User block codec.
//!
//! The user block is a fixed-size reserved region at the start of every
//! container file. It links the files of a chain together and carries the
//! payload hashsum. Layout:
//!
//! ```text
//! ih5_v01\n<claimed-size-decimal>\n<json-object>\x00<padding>
//! ```
//!
//! The JSON object must not contain newlines; the first NUL byte terminates
//! it. The block is read and written with plain byte I/O so that it can be
//! updated in place after the storage layer has closed the file.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ih5_tree::TREE_SIGNATURE;

use crate::error::{Error, Result};

/// Magic string identifying a valid container file.
pub const FORMAT_MAGIC: &str = "ih5_v01";

/// Default reserved user block size in bytes.
///
/// Must be a power of two and at least 512.
pub const USER_BLOCK_SIZE: u64 = 1024;

fn default_block_size() -> u64 {
    USER_BLOCK_SIZE
}

/// Administrative metadata linking the files of a container chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBlock {
    /// Block size claimed inside the block itself (second line)
    #[serde(skip, default = "default_block_size")]
    pub(crate) block_size: u64,

    /// UUID shared by all files forming one (patched) record
    pub record_uuid: Uuid,

    /// Revision number; this file is the n-th patch
    pub patch_index: u64,

    /// UUID of this particular container state
    pub patch_uuid: Uuid,

    /// `patch_uuid` of the predecessor, `None` for a base container
    pub prev_patch: Option<Uuid>,

    /// Qualified hashsum of the payload past the user block, `None` until
    /// the container is committed
    pub hdf5_hashsum: Option<String>,

    /// Opaque extension sections keyed by extension name.
    ///
    /// In a merge only the newest extension sections are preserved.
    pub ub_exts: BTreeMap<String, serde_json::Value>,
}

/// Parse magic and claimed size; returns (claimed size, offset of the JSON).
fn parse_prefix(buf: &[u8]) -> Option<(u64, usize)> {
    let i1 = buf.iter().position(|b| *b == b'\n')?;
    if &buf[..i1] != FORMAT_MAGIC.as_bytes() {
        return None;
    }
    let rest = &buf[i1 + 1..];
    let i2 = rest.iter().position(|b| *b == b'\n')?;
    let size: u64 = std::str::from_utf8(&rest[..i2]).ok()?.parse().ok()?;
    Some((size, i1 + 1 + i2 + 1))
}

impl UserBlock {
    /// Create a new user block for a base or patch container.
    ///
    /// With `prev = None` this is a fresh base container block; otherwise the
    /// result links back to the passed predecessor.
    pub fn create(prev: Option<&UserBlock>) -> UserBlock {
        UserBlock {
            block_size: USER_BLOCK_SIZE,
            record_uuid: prev.map_or_else(Uuid::new_v4, |p| p.record_uuid),
            patch_index: prev.map_or(0, |p| p.patch_index + 1),
            patch_uuid: Uuid::new_v4(),
            prev_patch: prev.map(|p| p.patch_uuid),
            hdf5_hashsum: None,
            ub_exts: BTreeMap::new(),
        }
    }

    /// Size of the reserved region this block claims for itself.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Load the user block of the given container file.
    pub fn load(path: impl AsRef<Path>) -> Result<UserBlock> {
        let path = path.as_ref();
        let mut f = File::open(path)?;

        // probe the smallest valid block size first
        let mut probe = vec![0u8; 512];
        f.read_exact(&mut probe)
            .map_err(|_| Error::NotAContainer(path.to_path_buf()))?;
        let (size, json_off) =
            parse_prefix(&probe).ok_or_else(|| Error::NotAContainer(path.to_path_buf()))?;

        if size < 512 || !size.is_power_of_two() {
            return Err(Error::CorruptUserBlock {
                path: path.to_path_buf(),
                reason: format!("claimed size {size} is not a power of two >= 512"),
            });
        }

        let block = if size > 512 {
            let mut b = vec![0u8; size as usize];
            f.seek(SeekFrom::Start(0))?;
            f.read_exact(&mut b).map_err(|_| Error::CorruptUserBlock {
                path: path.to_path_buf(),
                reason: format!("claimed size {size} reaches past the end of the file"),
            })?;
            b
        } else {
            probe
        };

        let body = &block[json_off..];
        let nul = body
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::CorruptUserBlock {
                path: path.to_path_buf(),
                reason: "metadata record is not NUL-terminated".to_string(),
            })?;
        let mut ub: UserBlock =
            serde_json::from_slice(&body[..nul]).map_err(|e| Error::CorruptUserBlock {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        ub.block_size = size;
        Ok(ub)
    }

    /// Write this block into the reserved region of the given file.
    ///
    /// The file must have been created with a reserved user block; a file
    /// whose payload starts at offset zero is rejected.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string(self).map_err(|e| Error::CorruptUserBlock {
            path: path.to_path_buf(),
            reason: format!("serialization failed: {e}"),
        })?;
        let data = format!("{FORMAT_MAGIC}\n{}\n{json}", self.block_size);
        if data.len() + 1 > self.block_size as usize {
            return Err(Error::UserBlockTooSmall {
                path: path.to_path_buf(),
                need: data.len() + 1,
                have: self.block_size as usize,
            });
        }

        let mut f = OpenOptions::new().read(true).write(true).open(path)?;
        let mut sig = [0u8; 4];
        f.read_exact(&mut sig)?;
        if sig == TREE_SIGNATURE[..4] {
            return Err(Error::NoReservedUserBlock(path.to_path_buf()));
        }
        f.seek(SeekFrom::Start(0))?;
        f.write_all(data.as_bytes())?;
        f.write_all(&[0])?;
        f.flush()?;
        Ok(())
    }
}
