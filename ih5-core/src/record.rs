//! Records: chains of one base container plus patch containers.
//!
//! A record wraps an ordered set of immutable container files plus at most
//! one writable tail. Runtime invariants upheld between method calls:
//!
//! - all containers of an open record are readable until `close()`
//! - containers are kept in patch index order
//! - at most one container is writable, and it is always the tail
//! - modifications are possible only between `create_patch` and
//!   `commit_patch`/`discard_patch`

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ih5_tree::{AccessMode, TreeFile, Value};
use tracing::debug;
use uuid::Uuid;

use crate::chain::{ChainState, Container, SharedChain};
use crate::error::{Error, Result};
use crate::hashsum::{file_hashsum, recompute_like, HashAlg};
use crate::naming;
use crate::overlay::{root_group, AttributeSet, Dataset, Group, Node};
use crate::userblock::UserBlock;

/// Open modes for records, mirroring common file-open conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`: read-only view of an existing record
    Read,
    /// `r+`: read-write; reopens an incomplete tail or creates a new patch
    ReadWrite,
    /// `a`: like `r+`, but creates a fresh record if none exists
    Append,
    /// `w`: create a new record, deleting any existing files of that name
    Truncate,
    /// `w-`/`x`: create a new record, failing if any file already exists
    CreateNew,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "r",
            OpenMode::ReadWrite => "r+",
            OpenMode::Append => "a",
            OpenMode::Truncate => "w",
            OpenMode::CreateNew => "x",
        }
    }
}

impl std::str::FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<OpenMode> {
        match s {
            "r" => Ok(OpenMode::Read),
            "r+" => Ok(OpenMode::ReadWrite),
            "a" => Ok(OpenMode::Append),
            "w" => Ok(OpenMode::Truncate),
            "w-" | "x" => Ok(OpenMode::CreateNew),
            other => Err(Error::Lifecycle(format!("unknown open mode: '{other}'"))),
        }
    }
}

impl core::fmt::Display for OpenMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, patchable record.
///
/// Closes itself (committing a pending patch) when dropped; call
/// [`Record::close`] explicitly to handle errors.
pub struct Record {
    pub(crate) chain: SharedChain,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.chain, &other.chain)
    }
}

impl core::fmt::Debug for Record {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.chain.try_borrow() {
            Ok(st) => write!(
                f,
                "Record(mode={}, files={:?})",
                if st.allow_patching { "r+" } else { "r" },
                st.containers.iter().map(|c| &c.path).collect::<Vec<_>>()
            ),
            Err(_) => write!(f, "Record(<borrowed>)"),
        }
    }
}

impl Record {
    /// Open or create the record addressed by `record` (a directory path
    /// plus the record name, without extension).
    ///
    /// Container files are discovered syntactically via the naming
    /// convention. With `Read`, patching is disabled; with `ReadWrite` or
    /// `Append` the record ends up with a writable tail (either resuming an
    /// incomplete patch or creating a fresh one).
    pub fn open(record: impl AsRef<Path>, mode: OpenMode) -> Result<Record> {
        let record = record.as_ref();
        match mode {
            OpenMode::Truncate => Self::create_record(record, true),
            OpenMode::CreateNew => {
                if !naming::find_record_files(record)?.is_empty() {
                    return Err(Error::RecordExists(record.to_path_buf()));
                }
                Self::create_record(record, false)
            }
            OpenMode::Read | OpenMode::ReadWrite | OpenMode::Append => {
                let paths = naming::find_record_files(record)?;
                if paths.is_empty() {
                    if mode == OpenMode::Append {
                        return Self::create_record(record, false);
                    }
                    return Err(Error::RecordNotFound(record.to_path_buf()));
                }
                let want_rw = mode != OpenMode::Read;
                let mut ret = Self::open_files(&paths, want_rw, false)?;
                if want_rw && !ret.has_writable_patch() {
                    ret.create_patch()?;
                }
                Ok(ret)
            }
        }
    }

    /// Create a new record, failing if one of that name already exists.
    pub fn create(record: impl AsRef<Path>) -> Result<Record> {
        Self::open(record, OpenMode::CreateNew)
    }

    fn create_record(record: &Path, truncate: bool) -> Result<Record> {
        if truncate {
            naming::delete_record_files(record)?;
        } else {
            // validates the record name
            naming::find_record_files(record)?;
        }
        let path = naming::base_path(record);
        let ublock = UserBlock::create(None);
        debug!(path = %path.display(), "creating fresh base container");
        let container = Container::create(path, ublock)?;
        Ok(Record {
            chain: Rc::new(RefCell::new(ChainState {
                containers: vec![container],
                closed: false,
                allow_patching: true,
            })),
        })
    }

    /// Open an explicit set of container files forming a record.
    ///
    /// The files are sorted by patch index and validated: a shared record
    /// UUID, pairwise increasing indexes and predecessor links, unique patch
    /// UUIDs, and payload integrity. An incomplete tail (no hashsum) is
    /// reopened writable when `writable` is set and rejected otherwise.
    /// `allow_baseless` admits a chain whose first file is a patch, for
    /// applying patch subchains against absent bases.
    ///
    /// Note that this does not create a fresh patch; a fully committed chain
    /// opened with `writable` has no writable tail until `create_patch`.
    pub fn open_files(paths: &[PathBuf], writable: bool, allow_baseless: bool) -> Result<Record> {
        if paths.is_empty() {
            return Err(Error::Lifecycle(
                "cannot open an empty list of containers".to_string(),
            ));
        }

        let mut containers = Vec::with_capacity(paths.len());
        for path in paths {
            let ublock = UserBlock::load(path)?;
            let tree = TreeFile::open(path, AccessMode::ReadOnly)?;
            containers.push(Container {
                path: path.clone(),
                ublock,
                tree,
            });
        }
        containers.sort_by_key(|c| c.ublock.patch_index);

        check_chain(&containers, allow_baseless)?;

        let n = containers.len();
        if containers[n - 1].ublock.hdf5_hashsum.is_none() {
            if !writable {
                return Err(Error::IncompleteTail(containers[n - 1].path.clone()));
            }
            // resume the incomplete patch
            let path = containers[n - 1].path.clone();
            debug!(path = %path.display(), "reopening incomplete tail container writable");
            containers[n - 1].tree = TreeFile::open(&path, AccessMode::ReadWrite)?;
        }

        debug!(files = n, writable, "opened container chain");
        Ok(Record {
            chain: Rc::new(RefCell::new(ChainState {
                containers,
                closed: false,
                allow_patching: writable,
            })),
        })
    }

    /// All container files that look like they belong to the record.
    pub fn find_files(record: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        naming::find_record_files(record.as_ref())
    }

    /// Record paths found in a directory (non-recursive).
    pub fn list_records(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        naming::list_records(dir.as_ref())
    }

    /// Irreversibly delete all files of the record.
    pub fn delete_files(record: impl AsRef<Path>) -> Result<()> {
        naming::delete_record_files(record.as_ref())
    }

    // ---- accessors ----

    fn state(&self) -> Result<std::cell::Ref<'_, ChainState>> {
        let st = self.chain.borrow();
        st.expect_open()?;
        Ok(st)
    }

    fn state_mut(&self) -> Result<std::cell::RefMut<'_, ChainState>> {
        let st = self.chain.borrow_mut();
        st.expect_open()?;
        Ok(st)
    }

    /// Whether this record permits patching (`r+`) or not (`r`).
    pub fn mode(&self) -> OpenMode {
        if self.chain.borrow().allow_patching {
            OpenMode::ReadWrite
        } else {
            OpenMode::Read
        }
    }

    pub fn is_closed(&self) -> bool {
        self.chain.borrow().closed
    }

    /// True iff an uncommitted patch exists.
    pub fn has_writable_patch(&self) -> bool {
        self.chain.borrow().has_writable()
    }

    /// The record UUID shared by all containers.
    pub fn ih5_uuid(&self) -> Result<Uuid> {
        Ok(self.state()?.containers[0].ublock.record_uuid)
    }

    /// Paths of the container files, in patch order.
    pub fn ih5_files(&self) -> Result<Vec<PathBuf>> {
        Ok(self.state()?.containers.iter().map(|c| c.path.clone()).collect())
    }

    /// User block metadata of each container, in patch order.
    pub fn ih5_meta(&self) -> Result<Vec<UserBlock>> {
        Ok(self.state()?.containers.iter().map(|c| c.ublock.clone()).collect())
    }

    /// The root group of the merged view.
    pub fn root(&self) -> Result<Group> {
        root_group(self.chain.clone())
    }

    // ---- patch lifecycle ----

    fn expect_patching_allowed(&self) -> Result<()> {
        let st = self.state()?;
        if !st.allow_patching {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Compute the file path for the next patch container.
    fn next_patch_path(&self) -> Result<PathBuf> {
        let st = self.state()?;
        let first = &st.containers[0].path;
        let dir = first.parent().unwrap_or_else(|| Path::new("."));
        let name = naming::infer_name(first);
        let next_index = st.tail().ublock.patch_index + 1;
        Ok(naming::patch_path(&dir.join(name), next_index))
    }

    /// Create a new writable patch container at the tail of the chain.
    pub fn create_patch(&mut self) -> Result<()> {
        self.expect_patching_allowed()?;
        if self.has_writable_patch() {
            return Err(Error::Lifecycle(
                "there already is a writable container, commit or discard it first".to_string(),
            ));
        }
        let path = self.next_patch_path()?;
        let ublock = {
            let st = self.state()?;
            UserBlock::create(Some(&st.tail().ublock))
        };
        debug!(path = %path.display(), index = ublock.patch_index, "creating patch container");
        let container = Container::create(path, ublock)?;
        self.state_mut()?.containers.push(container);
        Ok(())
    }

    /// Complete the current writable container (base or patch).
    ///
    /// Flushes the payload, computes its hashsum, rewrites the user block in
    /// place and reopens the container read-only. On failure the tail file
    /// is left on disk so the caller may retry or discard.
    pub fn commit_patch(&mut self) -> Result<()> {
        self.expect_patching_allowed()?;
        if !self.has_writable_patch() {
            return Err(Error::Lifecycle("no patch to commit".to_string()));
        }

        let (path, skip) = {
            let mut st = self.state_mut()?;
            let tail = st.tail_mut();
            tail.tree.flush()?;
            (tail.path.clone(), tail.tree.userblock_size())
        };

        let chksum = file_hashsum(&path, HashAlg::default(), skip)?;
        {
            let mut st = self.state_mut()?;
            let tail = st.tail_mut();
            tail.ublock.hdf5_hashsum = Some(chksum);
            if let Err(e) = tail.ublock.save(&path) {
                tail.ublock.hdf5_hashsum = None;
                return Err(e);
            }
        }

        let reopened = TreeFile::open(&path, AccessMode::ReadOnly)?;
        self.state_mut()?.tail_mut().tree = reopened;
        debug!(path = %path.display(), "committed container");
        Ok(())
    }

    /// Discard the current incomplete patch container, deleting its file.
    ///
    /// The base container cannot be discarded.
    pub fn discard_patch(&mut self) -> Result<()> {
        self.expect_patching_allowed()?;
        if !self.has_writable_patch() {
            return Err(Error::Lifecycle("no patch to discard".to_string()));
        }
        {
            let st = self.state()?;
            if st.containers.len() == 1 {
                // the base supplies the record identity, discarding it would
                // leave the object unusable
                return Err(Error::Lifecycle(
                    "cannot discard the base container, delete the record instead".to_string(),
                ));
            }
        }
        let container = self
            .state_mut()?
            .containers
            .pop()
            .expect("checked non-empty");
        let path = container.path.clone();
        drop(container);
        std::fs::remove_file(&path)?;
        debug!(path = %path.display(), "discarded patch container");
        Ok(())
    }

    /// Close all files of this record.
    ///
    /// An uncommitted patch is committed unless `commit` is false, in which
    /// case it stays on disk as a resumable incomplete tail.
    pub fn close(&mut self, commit: bool) -> Result<()> {
        if self.chain.borrow().closed {
            return Ok(());
        }
        if self.has_writable_patch() {
            if commit {
                self.commit_patch()?;
            } else {
                self.state_mut()?.tail_mut().tree.flush()?;
            }
        }
        let mut st = self.chain.borrow_mut();
        st.containers.clear();
        st.closed = true;
        debug!("closed record");
        Ok(())
    }

    /// Merge the whole chain into a fresh single-container record at
    /// `target` and return the new container path.
    ///
    /// The merged container keeps the identity of the original tail (record
    /// UUID, patch index and UUID, user block extensions); its predecessor
    /// link is taken from the original base (normally none).
    pub fn merge_files(&self, target: impl AsRef<Path>) -> Result<PathBuf> {
        self.state()?;
        if self.has_writable_patch() {
            return Err(Error::Lifecycle(
                "cannot merge, commit or discard changes first".to_string(),
            ));
        }

        let mut merged = Record::open(target.as_ref(), OpenMode::CreateNew)?;
        let src_root = self.root()?;
        let dst_root = merged.root()?;
        for (k, v) in src_root.attrs().items()? {
            dst_root.attrs().set(&k, v)?;
        }
        for name in src_root.keys()? {
            let node = src_root.get(&name)?;
            dst_root.create_copy(&name, &node)?;
        }
        let merged_path = merged.ih5_files()?[0].clone();
        merged.close(true)?;

        let mut ublock = {
            let st = self.state()?;
            let mut ub = st.tail().ublock.clone();
            ub.prev_patch = st.containers[0].ublock.prev_patch;
            ub
        };
        ublock.block_size = UserBlock::load(&merged_path)?.block_size();
        let chksum = file_hashsum(&merged_path, HashAlg::default(), ublock.block_size())?;
        ublock.hdf5_hashsum = Some(chksum);
        ublock.save(&merged_path)?;
        debug!(path = %merged_path.display(), "merged record into single container");
        Ok(merged_path)
    }

    /// Replace the user block of the writable tail container (in memory; it
    /// is persisted at commit). Used to imprint a foreign identity when
    /// initializing structural stubs.
    pub fn set_tail_userblock(&mut self, mut ublock: UserBlock) -> Result<()> {
        if !self.has_writable_patch() {
            return Err(Error::Lifecycle(
                "no writable container to replace the user block of".to_string(),
            ));
        }
        let mut st = self.state_mut()?;
        let tail = st.tail_mut();
        ublock.block_size = tail.tree.userblock_size();
        tail.ublock = ublock;
        Ok(())
    }

    // ---- convenience access to the merged view ----

    /// Attributes of the root group.
    pub fn attrs(&self) -> Result<AttributeSet> {
        Ok(self.root()?.attrs())
    }

    pub fn get(&self, path: &str) -> Result<Node> {
        self.root()?.get(path)
    }

    pub fn get_opt(&self, path: &str) -> Result<Option<Node>> {
        self.root()?.get_opt(path)
    }

    pub fn get_group(&self, path: &str) -> Result<Group> {
        self.root()?.get_group(path)
    }

    pub fn get_dataset(&self, path: &str) -> Result<Dataset> {
        self.root()?.get_dataset(path)
    }

    pub fn contains(&self, path: &str) -> Result<bool> {
        self.root()?.contains(path)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.root()?.keys()
    }

    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.root()?.set(path, value)
    }

    pub fn create_group(&self, path: &str) -> Result<Group> {
        self.root()?.create_group(path)
    }

    pub fn create_dataset(&self, path: &str, value: impl Into<Value>) -> Result<Dataset> {
        self.root()?.create_dataset(path, value)
    }

    pub fn require_group(&self, path: &str) -> Result<Group> {
        self.root()?.require_group(path)
    }

    pub fn require_dataset(&self, path: &str, value: impl Into<Value>) -> Result<Dataset> {
        self.root()?.require_dataset(path, value)
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.root()?.delete(path)
    }

    pub fn copy_entry(&self, src: &str, dst: &str) -> Result<()> {
        self.root()?.copy_entry(src, dst)
    }

    pub fn move_entry(&self, src: &str, dst: &str) -> Result<()> {
        self.root()?.move_entry(src, dst)
    }

    pub fn visititems<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&str, &Node) -> Result<()>,
    {
        self.root()?.visititems(f)
    }

    pub fn visit<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<()>,
    {
        self.root()?.visit(f)
    }

    /// Whether the record currently contains any data.
    pub fn is_empty(&self) -> Result<bool> {
        let root = self.root()?;
        Ok(root.is_empty()? && root.attrs().is_empty()?)
    }

    /// Delete all children and attributes of the root.
    pub fn clear(&mut self) -> Result<()> {
        let root = self.root()?;
        for k in root.attrs().keys()? {
            root.attrs().delete(&k)?;
        }
        for k in root.keys()? {
            root.delete(&k)?;
        }
        Ok(())
    }
}

impl Drop for Record {
    fn drop(&mut self) {
        let closed = match self.chain.try_borrow() {
            Ok(st) => st.closed,
            Err(_) => return,
        };
        if !closed {
            if let Err(e) = self.close(true) {
                tracing::error!("failed to close record on drop: {e}");
            }
        }
    }
}

/// Validate the chain structure of a sorted container list.
fn check_chain(containers: &[Container], allow_baseless: bool) -> Result<()> {
    let first = &containers[0];
    if !allow_baseless && first.ublock.prev_patch.is_some() {
        return Err(Error::BrokenChain {
            path: first.path.clone(),
            reason: "base container must not have a predecessor link".to_string(),
        });
    }

    let record_uuid = first.ublock.record_uuid;
    let n = containers.len();
    for (i, c) in containers.iter().enumerate() {
        if c.ublock.record_uuid != record_uuid {
            return Err(Error::BrokenChain {
                path: c.path.clone(),
                reason: "record_uuid differs between containers, mixed up records?".to_string(),
            });
        }
        match &c.ublock.hdf5_hashsum {
            Some(stored) => {
                let computed = recompute_like(stored, &c.path, c.ublock.block_size())?;
                if *stored != computed {
                    return Err(Error::IntegrityFailure {
                        path: c.path.clone(),
                        stored: stored.clone(),
                        computed,
                    });
                }
            }
            None => {
                if i + 1 != n {
                    return Err(Error::BrokenChain {
                        path: c.path.clone(),
                        reason: "only the tail container may lack a hashsum".to_string(),
                    });
                }
            }
        }
    }

    for pair in containers.windows(2) {
        let (earlier, later) = (&pair[0], &pair[1]);
        if later.ublock.patch_index <= earlier.ublock.patch_index {
            return Err(Error::BrokenChain {
                path: later.path.clone(),
                reason: "patch container must have a greater index than its predecessor"
                    .to_string(),
            });
        }
        match later.ublock.prev_patch {
            None => {
                return Err(Error::BrokenChain {
                    path: later.path.clone(),
                    reason: "patch container lacks a predecessor link".to_string(),
                });
            }
            Some(prev) => {
                if prev != earlier.ublock.patch_uuid {
                    return Err(Error::BrokenChain {
                        path: later.path.clone(),
                        reason: format!(
                            "patch links to {prev}, but its predecessor is {}",
                            earlier.ublock.patch_uuid
                        ),
                    });
                }
            }
        }
    }

    let uuids: std::collections::HashSet<Uuid> =
        containers.iter().map(|c| c.ublock.patch_uuid).collect();
    if uuids.len() != n {
        return Err(Error::BrokenChain {
            path: first.path.clone(),
            reason: "patch_uuid values are not unique".to_string(),
        });
    }
    Ok(())
}
