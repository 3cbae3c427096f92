//! Manifest-aware records.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use tracing::debug;

use ih5_core::{recompute_like, Error, OpenMode, Record, Result};

use crate::manifest::{Manifest, UbExtManifest};
use crate::skeleton::Skeleton;
use crate::stub;

/// A record extended by a manifest sidecar file.
///
/// The sidecar carries enough information (tail user block, skeleton) to
/// create a stub container and author patches without the data files. Every
/// commit regenerates the manifest, embeds its hashsum in the tail user
/// block, and writes the sidecar next to the tail container. On open, the
/// sidecar found next to the tail must match the embedded reference.
///
/// Any plain record is a valid manifest-aware record (the extension is
/// simply absent); committing a patch turns it into a full one.
pub struct MfRecord {
    record: Record,
    manifest: Option<Manifest>,
}

impl Deref for MfRecord {
    type Target = Record;

    fn deref(&self) -> &Record {
        &self.record
    }
}

impl DerefMut for MfRecord {
    fn deref_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

impl core::fmt::Debug for MfRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "MfRecord({:?})", self.record)
    }
}

impl MfRecord {
    /// Open or create a manifest-aware record (same modes as
    /// [`Record::open`]).
    pub fn open(record: impl AsRef<Path>, mode: OpenMode) -> Result<MfRecord> {
        let record = record.as_ref();
        match mode {
            OpenMode::Truncate | OpenMode::CreateNew => Ok(MfRecord {
                record: Record::open(record, mode)?,
                manifest: None,
            }),
            OpenMode::Read | OpenMode::ReadWrite | OpenMode::Append => {
                let paths = Record::find_files(record)?;
                if paths.is_empty() {
                    if mode == OpenMode::Append {
                        return Ok(MfRecord {
                            record: Record::open(record, mode)?,
                            manifest: None,
                        });
                    }
                    return Err(Error::RecordNotFound(record.to_path_buf()));
                }
                let want_rw = mode != OpenMode::Read;
                let mut ret = Self::open_files(&paths, want_rw, false, None)?;
                if want_rw && !ret.record.has_writable_patch() {
                    ret.record.create_patch()?;
                }
                Ok(ret)
            }
        }
    }

    /// Create a new manifest-aware record, failing if files already exist.
    pub fn create(record: impl AsRef<Path>) -> Result<MfRecord> {
        Self::open(record, OpenMode::CreateNew)
    }

    /// Open an explicit set of container files (see [`Record::open_files`]),
    /// additionally validating stub flags and the manifest sidecar of the
    /// tail. `manifest_file` overrides the canonical sidecar location.
    pub fn open_files(
        paths: &[PathBuf],
        writable: bool,
        allow_baseless: bool,
        manifest_file: Option<&Path>,
    ) -> Result<MfRecord> {
        let mut record = Record::open_files(paths, writable, allow_baseless)?;
        match Self::validate_open(&record, manifest_file) {
            Ok(manifest) => Ok(MfRecord { record, manifest }),
            Err(e) => {
                // leave no handles open and never auto-commit a tail that
                // failed validation
                let _ = record.close(false);
                Err(e)
            }
        }
    }

    fn validate_open(record: &Record, manifest_file: Option<&Path>) -> Result<Option<Manifest>> {
        let meta = record.ih5_meta()?;
        let files = record.ih5_files()?;

        // stubs may only sit at the base of a chain
        for (i, ub) in meta.iter().enumerate().skip(1) {
            if let Some(ext) = UbExtManifest::get(ub)? {
                if ext.is_stub_container {
                    return Err(Error::StubNotBase(files[i].clone()));
                }
            }
        }

        let tail_ub = meta.last().expect("chain is non-empty");
        match UbExtManifest::get(tail_ub)? {
            None => Ok(None),
            Some(ext) => {
                let mf_path = manifest_file
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| Manifest::sidecar_path(files.last().expect("non-empty")));
                if !mf_path.is_file() {
                    return Err(Error::ManifestMismatch {
                        path: mf_path,
                        reason: "manifest file does not exist".to_string(),
                    });
                }
                let computed = recompute_like(&ext.manifest_hashsum, &mf_path, 0)?;
                if computed != ext.manifest_hashsum {
                    return Err(Error::ManifestMismatch {
                        path: mf_path,
                        reason: "manifest has been modified, unexpected hashsum".to_string(),
                    });
                }
                let mf = Manifest::load(&mf_path)?;
                if mf.manifest_uuid != ext.manifest_uuid {
                    return Err(Error::ManifestMismatch {
                        path: mf_path,
                        reason: "manifest UUID does not match the user block".to_string(),
                    });
                }
                Ok(Some(mf))
            }
        }
    }

    /// Borrow the wrapped plain record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// The manifest of the latest committed patch.
    pub fn manifest(&self) -> Result<&Manifest> {
        self.manifest.as_ref().ok_or_else(|| {
            Error::Lifecycle("no manifest exists yet, commit a patch first".to_string())
        })
    }

    /// Commit the writable container, regenerating the manifest sidecar.
    ///
    /// Manifest extension data is inherited from the previous manifest.
    pub fn commit_patch(&mut self) -> Result<()> {
        self.commit_internal(false, None)
    }

    /// Like [`MfRecord::commit_patch`], but replacing the manifest
    /// extension bag.
    pub fn commit_with_exts(
        &mut self,
        exts: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        self.commit_internal(false, Some(exts))
    }

    fn commit_internal(
        &mut self,
        is_stub: bool,
        exts: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Result<()> {
        if !self.record.has_writable_patch() {
            return Err(Error::Lifecycle("no patch to commit".to_string()));
        }

        let meta = self.record.ih5_meta()?;
        let old_ub = meta.last().expect("chain is non-empty").clone();

        // manifest for the prospective patch, from the pre-commit state
        let skeleton = Skeleton::of_record(&self.record)?;
        let mut mf = Manifest::from_userblock(&old_ub, skeleton, BTreeMap::new());
        if let Some(prev) = &self.manifest {
            mf.manifest_exts = prev.manifest_exts.clone();
        }
        if let Some(exts) = exts {
            mf.manifest_exts = exts;
        }

        let ext = UbExtManifest {
            is_stub_container: is_stub,
            manifest_uuid: mf.manifest_uuid,
            manifest_hashsum: mf.hashsum()?,
        };
        let mut new_ub = old_ub.clone();
        ext.update(&mut new_ub);

        self.record.set_tail_userblock(new_ub)?;
        if let Err(e) = self.record.commit_patch() {
            // keep the chain usable for retry or discard
            let _ = self.record.set_tail_userblock(old_ub);
            return Err(e);
        }

        let tail_path = self
            .record
            .ih5_files()?
            .last()
            .expect("chain is non-empty")
            .clone();
        mf.save(&Manifest::sidecar_path(&tail_path))?;
        debug!(path = %tail_path.display(), "wrote manifest sidecar");
        self.manifest = Some(mf);
        Ok(())
    }

    /// Merge the chain into a single container (see
    /// [`Record::merge_files`]). Chains containing a stub cannot be merged;
    /// the merged container inherits the current manifest.
    pub fn merge_files(&self, target: impl AsRef<Path>) -> Result<PathBuf> {
        for ub in self.record.ih5_meta()? {
            if let Some(ext) = UbExtManifest::get(&ub)? {
                if ext.is_stub_container {
                    return Err(Error::Lifecycle(
                        "cannot merge, the chain contains a stub container".to_string(),
                    ));
                }
            }
        }
        let merged = self.record.merge_files(target)?;
        if let Some(mf) = &self.manifest {
            // the merged user block inherited the manifest extension, so the
            // original sidecar must sit next to the merged file
            mf.save(&Manifest::sidecar_path(&merged))?;
        }
        Ok(merged)
    }

    /// Close the record, committing a pending patch (with manifest) unless
    /// `commit` is false.
    pub fn close(&mut self, commit: bool) -> Result<()> {
        if self.record.is_closed() {
            return Ok(());
        }
        if commit
            && self.record.has_writable_patch()
            && self.record.mode() == OpenMode::ReadWrite
        {
            self.commit_internal(false, None)?;
        }
        self.record.close(false)
    }

    /// Create a stub base container for patching a record that is not
    /// locally available, from its manifest alone.
    ///
    /// The stub mirrors the recorded skeleton with empty values, carries the
    /// original chain identity, and is flagged as a stub in its user block
    /// extension. Patches on top of it are compatible with the original
    /// record. The returned record is committed and read-only.
    pub fn create_stub(
        target: impl AsRef<Path>,
        manifest_file: impl AsRef<Path>,
    ) -> Result<MfRecord> {
        let manifest = Manifest::load(manifest_file.as_ref())?;
        debug!(target = %target.as_ref().display(), "creating stub base container");

        let mut record = Record::create(target.as_ref())?;
        stub::init_stub_skeleton(&mut record, &manifest.skeleton)?;
        let mut ub = manifest.user_block.clone();
        ub.prev_patch = None;
        record.set_tail_userblock(ub)?;

        let mut ret = MfRecord {
            record,
            manifest: None,
        };
        ret.commit_internal(true, None)?;
        Ok(ret)
    }
}

impl Drop for MfRecord {
    fn drop(&mut self) {
        if self.record.is_closed() {
            return;
        }
        if let Err(e) = self.close(true) {
            tracing::error!("failed to close manifest record on drop: {e}");
            let _ = self.record.close(false);
        }
    }
}
