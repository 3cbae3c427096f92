//! Record naming convention and file discovery.
//!
//! A record named `NAME` in directory `DIR` consists of the base container
//! `DIR/NAME.ih5` and patch containers `DIR/NAME.p<idx>.ih5`. Names are
//! restricted to `[A-Za-z0-9-]` so that the character following the name in
//! any filename is never name-valid, which makes prefix matching unambiguous
//! (`foo` never picks up `foobar.ih5`).

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File extension of all container files.
pub const FILE_EXT: &str = ".ih5";

/// Infix of patch container files, followed by the patch index.
pub const PATCH_INFIX: &str = ".p";

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// Returns whether a record name is valid.
pub fn is_valid_record_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_name_char)
}

fn record_name(record: &Path) -> Result<&str> {
    let name = record
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !is_valid_record_name(name) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(name)
}

fn record_dir(record: &Path) -> PathBuf {
    match record.parent() {
        Some(p) if p.as_os_str().is_empty() => PathBuf::from("."),
        Some(p) => p.to_path_buf(),
        None => PathBuf::from("."),
    }
}

/// Path of the canonical base container for a record path.
pub fn base_path(record: &Path) -> PathBuf {
    let mut s = record.as_os_str().to_os_string();
    s.push(FILE_EXT);
    PathBuf::from(s)
}

/// Path of the patch container with the given index for a record path.
pub fn patch_path(record: &Path, patch_index: u64) -> PathBuf {
    let mut s = record.as_os_str().to_os_string();
    s.push(format!("{PATCH_INFIX}{patch_index}{FILE_EXT}"));
    PathBuf::from(s)
}

/// Infer the record name from a container filename.
pub fn infer_name(container: &Path) -> String {
    let name = container
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.split(FILE_EXT)
        .next()
        .unwrap_or_default()
        .split(PATCH_INFIX)
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Does `fname` look like a container file of the record called `name`?
fn matches_record(fname: &str, name: &str) -> bool {
    if !fname.starts_with(name) || !fname.ends_with(FILE_EXT) {
        return false;
    }
    // the char right after the name must not be name-valid, otherwise this
    // is a file of a record with a longer name
    match fname[name.len()..].chars().next() {
        Some(c) => !is_name_char(c),
        None => false,
    }
}

/// Return all files that look like they belong to the given record.
///
/// Purely syntactic matching on filenames following the naming convention;
/// the returned paths are sorted by name, not by patch order.
pub fn find_record_files(record: &Path) -> Result<Vec<PathBuf>> {
    let name = record_name(record)?;
    let dir = record_dir(record);
    let mut ret = Vec::new();
    if !dir.is_dir() {
        return Ok(ret);
    }
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(fname) = entry.file_name().to_str() {
            if matches_record(fname, name) {
                ret.push(dir.join(fname));
            }
        }
    }
    ret.sort();
    Ok(ret)
}

/// Return the record paths found in a directory (non-recursive).
///
/// The returned paths can be passed as-is when opening a record.
pub fn list_records(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("'{}' is not a directory", dir.display()),
        )));
    }
    let mut names = std::collections::BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let fname = match entry.file_name().to_str() {
            Some(s) => s.to_string(),
            None => continue,
        };
        if !fname.ends_with(FILE_EXT) {
            continue;
        }
        let prefix: String = fname.chars().take_while(|c| is_name_char(*c)).collect();
        if !prefix.is_empty() && prefix.len() < fname.len() {
            names.insert(prefix);
        }
    }
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

/// Irreversibly delete all files matching the record path, including any
/// manifest sidecars sitting next to them.
pub fn delete_record_files(record: &Path) -> Result<()> {
    for file in find_record_files(record)? {
        let mut sidecar = file.as_os_str().to_os_string();
        sidecar.push(crate::MANIFEST_FILE_SUFFIX);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.is_file() {
            std::fs::remove_file(&sidecar)?;
        }
        std::fs::remove_file(&file)?;
    }
    Ok(())
}
