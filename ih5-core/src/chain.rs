//! Shared state of an open container chain.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use ih5_tree::TreeFile;

use crate::error::{Error, Result};
use crate::userblock::UserBlock;

/// One physical container file of a chain.
#[derive(Debug)]
pub(crate) struct Container {
    pub path: PathBuf,
    pub ublock: UserBlock,
    pub tree: TreeFile,
}

impl Container {
    /// Initialize a fresh container file with a reserved user block.
    pub fn create(path: PathBuf, ublock: UserBlock) -> Result<Container> {
        let tree = match TreeFile::create(&path, ublock.block_size()) {
            Ok(tree) => tree,
            Err(ih5_tree::Error::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::RecordExists(path));
            }
            Err(e) => return Err(e.into()),
        };
        ublock.save(&path)?;
        Ok(Container { path, ublock, tree })
    }
}

/// The mutable state shared between a record and its overlay node handles.
///
/// Containers are kept in patch index order; at most the last one is open
/// for writing. After `close()` the container list is empty and every
/// operation fails with `NotOpen`.
#[derive(Debug)]
pub(crate) struct ChainState {
    pub containers: Vec<Container>,
    pub closed: bool,
    pub allow_patching: bool,
}

pub(crate) type SharedChain = Rc<RefCell<ChainState>>;

impl ChainState {
    pub fn expect_open(&self) -> Result<()> {
        if self.closed || self.containers.is_empty() {
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    pub fn last_idx(&self) -> usize {
        self.containers.len() - 1
    }

    pub fn tail(&self) -> &Container {
        self.containers.last().expect("chain is never empty while open")
    }

    pub fn tail_mut(&mut self) -> &mut Container {
        self.containers.last_mut().expect("chain is never empty while open")
    }

    /// True if the newest container cannot be written.
    pub fn is_read_only(&self) -> bool {
        self.containers.last().map_or(true, |c| c.tree.is_read_only())
    }

    /// True iff an uncommitted (writable) container exists.
    pub fn has_writable(&self) -> bool {
        self.containers.last().is_some_and(|c| !c.tree.is_read_only())
    }
}
