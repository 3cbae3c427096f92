//! On-disk tree files with a reserved user block.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::node::GroupNode;
use crate::{Error, Result};

/// Signature marking the start of the tree payload.
pub const TREE_SIGNATURE: [u8; 8] = *b"\x89TRE\r\n\x1a\n";

/// Current payload format version.
pub const FORMAT_VERSION: u8 = 1;

/// Signature + version byte + payload length.
const HEADER_LEN: u64 = 8 + 1 + 8;

/// Access mode of an open tree file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// An open tree file.
///
/// The node tree is held in memory; [`TreeFile::flush`] serializes it back
/// into the payload region. The reserved user block is never touched by this
/// type, so other code may rewrite it in place with plain byte I/O at any
/// time.
#[derive(Debug)]
pub struct TreeFile {
    path: PathBuf,
    file: std::fs::File,
    mode: AccessMode,
    userblock_size: u64,
    root: GroupNode,
}

fn is_valid_userblock_size(n: u64) -> bool {
    n == 0 || (n >= 512 && n.is_power_of_two())
}

impl TreeFile {
    /// Create a fresh, empty tree file with `userblock_size` reserved bytes.
    ///
    /// Fails if the file already exists or the size is not 0 or a power of
    /// two >= 512. The reserved region is zero-filled.
    pub fn create(path: impl AsRef<Path>, userblock_size: u64) -> Result<TreeFile> {
        let path = path.as_ref();
        if !is_valid_userblock_size(userblock_size) {
            return Err(Error::BadUserBlockSize(userblock_size));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&vec![0u8; userblock_size as usize])?;
        let mut ret = TreeFile {
            path: path.to_path_buf(),
            file,
            mode: AccessMode::ReadWrite,
            userblock_size,
            root: GroupNode::default(),
        };
        ret.flush()?;
        Ok(ret)
    }

    /// Open an existing tree file, discovering the user block size by probing
    /// for the payload signature at offset 0 and every power of two >= 512.
    pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<TreeFile> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(mode == AccessMode::ReadWrite)
            .open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let total = buf.len() as u64;
        let mut off = 0u64;
        let userblock_size = loop {
            if off + HEADER_LEN <= total
                && buf[off as usize..off as usize + 8] == TREE_SIGNATURE
            {
                break off;
            }
            off = if off == 0 { 512 } else { off * 2 };
            if off >= total {
                return Err(Error::NotATree(path.to_path_buf()));
            }
        };

        let start = userblock_size as usize;
        if buf[start + 8] != FORMAT_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported format version {}",
                buf[start + 8]
            )));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&buf[start + 9..start + 17]);
        let payload_len = u64::from_le_bytes(len_bytes) as usize;
        let payload_start = start + HEADER_LEN as usize;
        if payload_start + payload_len > buf.len() {
            return Err(Error::Corrupt("truncated payload".to_string()));
        }
        let root: GroupNode =
            postcard::from_bytes(&buf[payload_start..payload_start + payload_len])
                .map_err(|e| Error::Corrupt(e.to_string()))?;

        Ok(TreeFile {
            path: path.to_path_buf(),
            file,
            mode,
            userblock_size,
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == AccessMode::ReadOnly
    }

    pub fn userblock_size(&self) -> u64 {
        self.userblock_size
    }

    /// Read access to the node tree.
    pub fn root(&self) -> &GroupNode {
        &self.root
    }

    /// Mutable access to the node tree; fails on read-only handles.
    pub fn root_mut(&mut self) -> Result<&mut GroupNode> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        Ok(&mut self.root)
    }

    /// Serialize the node tree back into the payload region.
    pub fn flush(&mut self) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let payload = postcard::to_stdvec(&self.root).map_err(|e| Error::Corrupt(e.to_string()))?;
        let mut buf = Vec::with_capacity(HEADER_LEN as usize + payload.len());
        buf.extend_from_slice(&TREE_SIGNATURE);
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&payload);

        self.file.set_len(self.userblock_size)?;
        self.file.seek(SeekFrom::Start(self.userblock_size))?;
        self.file.write_all(&buf)?;
        self.file.flush()?;
        Ok(())
    }

    /// Flush (when writable) and release the file handle.
    pub fn close(mut self) -> Result<()> {
        if self.mode == AccessMode::ReadWrite {
            self.flush()?;
        }
        Ok(())
    }
}
