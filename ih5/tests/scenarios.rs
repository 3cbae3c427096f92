//! End-to-end scenarios across the whole stack.

use ih5::{Error, MfRecord, OpenMode, Record, Skeleton, Value, USER_BLOCK_SIZE};

fn tmp() -> tempfile::TempDir {
    tempfile::tempdir().expect("create tempdir")
}

/// Create, write, read back through a fresh handle.
#[test]
fn s1_create_write_read_back() {
    let dir = tmp();
    let record = dir.path().join("ds");

    let mut rec = Record::open(&record, OpenMode::Truncate).unwrap();
    rec.set("foo", 123i64).unwrap();
    rec.set("grp/bar", "baz").unwrap();
    rec.attrs().unwrap().set("rootattr", true).unwrap();
    rec.close(true).unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["ds.ih5".to_string()]);

    let rec = Record::open(&record, OpenMode::Read).unwrap();
    assert_eq!(rec.mode(), OpenMode::Read);
    assert_eq!(
        rec.get_dataset("foo").unwrap().value().unwrap(),
        Value::Int(123)
    );
    assert_eq!(
        rec.get_dataset("grp/bar").unwrap().value().unwrap(),
        Value::Str("baz".to_string())
    );
    assert_eq!(
        rec.attrs().unwrap().get("rootattr").unwrap(),
        Value::Bool(true)
    );
}

/// A patch creates, deletes and overrides; the base stays byte-identical.
#[test]
fn s2_patch_creates_deletes_overrides() {
    let dir = tmp();
    let record = dir.path().join("ds");

    let mut rec = Record::create(&record).unwrap();
    rec.set("a", 1i64).unwrap();
    rec.set("b", 2i64).unwrap();
    rec.create_group("g").unwrap();
    rec.close(true).unwrap();

    let base_file = Record::find_files(&record).unwrap()[0].clone();
    let base_bytes = std::fs::read(&base_file).unwrap();

    let mut rec = Record::open(&record, OpenMode::ReadWrite).unwrap();
    rec.delete("a").unwrap();
    rec.delete("b").unwrap();
    rec.set("b", 20i64).unwrap();
    rec.create_group("g/sub").unwrap();
    rec.set("g/sub/c", 3i64).unwrap();
    rec.commit_patch().unwrap();
    rec.close(true).unwrap();

    assert_eq!(Record::find_files(&record).unwrap().len(), 2);
    assert_eq!(std::fs::read(&base_file).unwrap(), base_bytes);

    let rec = Record::open(&record, OpenMode::Read).unwrap();
    assert!(!rec.contains("a").unwrap());
    assert_eq!(rec.get_dataset("b").unwrap().value().unwrap(), Value::Int(20));
    assert_eq!(
        rec.get_dataset("g/sub/c").unwrap().value().unwrap(),
        Value::Int(3)
    );
}

/// Discarding a patch restores the previous state exactly.
#[test]
fn s3_discard_restores_state() {
    let dir = tmp();
    let record = dir.path().join("ds");

    let mut rec = Record::create(&record).unwrap();
    rec.set("x", 1i64).unwrap();
    rec.commit_patch().unwrap();
    let skel_before = Skeleton::of_record(&rec).unwrap();

    rec.create_patch().unwrap();
    rec.delete("x").unwrap();
    rec.set("x", 99i64).unwrap();
    rec.set("junk", "scrap").unwrap();
    rec.discard_patch().unwrap();

    assert!(!rec.has_writable_patch());
    assert_eq!(rec.get_dataset("x").unwrap().value().unwrap(), Value::Int(1));
    assert!(!rec.contains("junk").unwrap());
    assert_eq!(Skeleton::of_record(&rec).unwrap(), skel_before);
    assert_eq!(Record::find_files(&record).unwrap().len(), 1);
    rec.close(true).unwrap();
}

/// A single corrupted payload byte is detected on reopen.
#[test]
fn s4_integrity_violation_detected() {
    use std::io::{Seek, SeekFrom, Write};

    let dir = tmp();
    let record = dir.path().join("ds");
    let mut rec = Record::create(&record).unwrap();
    rec.set("foo", 123i64).unwrap();
    rec.close(true).unwrap();

    let file = Record::find_files(&record).unwrap()[0].clone();
    let mut f = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&file)
        .unwrap();
    f.seek(SeekFrom::Start(USER_BLOCK_SIZE + 40)).unwrap();
    f.write_all(&[0x42]).unwrap();
    drop(f);

    assert!(matches!(
        Record::open(&record, OpenMode::Read),
        Err(Error::IntegrityFailure { .. })
    ));
}

/// A three-container chain merges into a single equivalent container.
#[test]
fn s5_merge_chain() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let target = dir.path().join("merged");

    let mut rec = Record::create(&record).unwrap();
    rec.set("keep", 1i64).unwrap();
    rec.set("kill", 2i64).unwrap();
    rec.attrs().unwrap().set("version", 1i64).unwrap();
    rec.commit_patch().unwrap();

    rec.create_patch().unwrap();
    rec.delete("kill").unwrap();
    rec.set("grp/new", "fresh").unwrap();
    rec.attrs().unwrap().set("version", 2i64).unwrap();
    rec.commit_patch().unwrap();

    rec.create_patch().unwrap();
    rec.get("grp/new").unwrap().attrs().set("note", "annotated").unwrap();
    rec.commit_patch().unwrap();

    rec.merge_files(&target).unwrap();

    let merged = Record::open(&target, OpenMode::Read).unwrap();
    assert_eq!(merged.ih5_files().unwrap().len(), 1);

    // identical visititems sequence
    let walk = |r: &Record| {
        let mut v = Vec::new();
        r.visititems(|p, n| {
            v.push((p.to_string(), n.is_group()));
            Ok(())
        })
        .unwrap();
        v
    };
    assert_eq!(walk(&rec), walk(&merged));

    // identical values and attributes
    assert_eq!(merged.get_dataset("keep").unwrap().value().unwrap(), Value::Int(1));
    assert!(!merged.contains("kill").unwrap());
    assert_eq!(
        merged.get("grp/new").unwrap().attrs().get("note").unwrap(),
        Value::Str("annotated".to_string())
    );
    assert_eq!(
        merged.attrs().unwrap().get("version").unwrap(),
        Value::Int(2)
    );

    // identity inherited from the original tail
    let orig_tail = rec.ih5_meta().unwrap().last().unwrap().clone();
    let merged_ub = merged.ih5_meta().unwrap()[0].clone();
    assert_eq!(merged_ub.record_uuid, orig_tail.record_uuid);
    assert_eq!(merged_ub.patch_index, orig_tail.patch_index);
    assert_eq!(merged_ub.patch_uuid, orig_tail.patch_uuid);
    assert_eq!(merged_ub.prev_patch, None);
    rec.close(true).unwrap();
}

/// Stub on a remote machine, patch there, apply the patch at home.
#[test]
fn s6_stub_and_remote_patch() {
    let dir = tmp();
    let record = dir.path().join("C");

    // home: a record with three containers and a manifest
    let mut rec = MfRecord::create(&record).unwrap();
    rec.set("base/data", vec![1i64, 2, 3]).unwrap();
    rec.commit_patch().unwrap();
    rec.create_patch().unwrap();
    rec.set("base/more", "text").unwrap();
    rec.commit_patch().unwrap();
    rec.create_patch().unwrap();
    rec.get("base/more").unwrap().attrs().set("k", "v").unwrap();
    rec.commit_patch().unwrap();

    let real_files = rec.ih5_files().unwrap();
    assert_eq!(real_files.len(), 3);
    let m2 = ih5::Manifest::sidecar_path(real_files.last().unwrap());
    rec.close(true).unwrap();

    // remote: only m2 is available; create a stub and patch it
    let remote = tmp();
    let stub_manifest = remote.path().join("m2.mf.json");
    std::fs::copy(&m2, &stub_manifest).unwrap();

    let stub_path = remote.path().join("S");
    let mut stub = MfRecord::create_stub(&stub_path, &stub_manifest).unwrap();
    stub.create_patch().unwrap();
    stub.set("new", 1i64).unwrap();
    stub.commit_patch().unwrap();
    let s1 = stub.ih5_files().unwrap().last().unwrap().clone();
    let s1_manifest = ih5::Manifest::sidecar_path(&s1);
    stub.close(true).unwrap();

    // home again: apply the remote patch on top of the real files
    let mut files = real_files.clone();
    files.push(s1);
    let combined = MfRecord::open_files(&files, false, false, Some(s1_manifest.as_path())).unwrap();

    assert_eq!(
        combined.get_dataset("new").unwrap().value().unwrap(),
        Value::Int(1)
    );
    assert_eq!(
        combined.get_dataset("base/data").unwrap().value().unwrap(),
        Value::IntArray(vec![1, 2, 3])
    );
    assert_eq!(
        combined.get_dataset("base/more").unwrap().value().unwrap(),
        Value::Str("text".to_string())
    );
    assert_eq!(
        combined.get("base/more").unwrap().attrs().get("k").unwrap(),
        Value::Str("v".to_string())
    );
}

/// Context-style scoped use: dropping a record commits pending work.
#[test]
fn drop_commits_pending_patch() {
    let dir = tmp();
    let record = dir.path().join("ds");
    {
        let rec = Record::create(&record).unwrap();
        rec.set("x", 7i64).unwrap();
        // dropped without an explicit close
    }
    let rec = Record::open(&record, OpenMode::Read).unwrap();
    assert_eq!(rec.get_dataset("x").unwrap().value().unwrap(), Value::Int(7));
}
