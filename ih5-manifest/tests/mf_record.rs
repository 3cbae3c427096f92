//! Tests for manifest-aware records.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ih5_core::{Error, OpenMode, Record, Value};
use ih5_manifest::{Manifest, MfRecord, UbExtManifest};

fn tmp() -> tempfile::TempDir {
    tempfile::tempdir().expect("create tempdir")
}

fn latest_manifest_path(rec: &Record) -> PathBuf {
    Manifest::sidecar_path(rec.ih5_files().unwrap().last().unwrap())
}

#[test]
fn fresh_record_has_no_manifest() {
    let dir = tmp();
    let mut rec = MfRecord::create(&dir.path().join("ds")).unwrap();
    assert!(matches!(rec.manifest(), Err(Error::Lifecycle(_))));
    rec.commit_patch().unwrap();
    assert!(rec.manifest().is_ok());
    rec.close(true).unwrap();
}

#[test]
fn commit_with_exts_stores_and_inherits() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let mut rec = MfRecord::create(&record).unwrap();
    let mut exts = BTreeMap::new();
    exts.insert("test_ext".to_string(), serde_json::json!("yeah!"));
    rec.commit_with_exts(exts).unwrap();
    rec.close(true).unwrap();

    let mut rec = MfRecord::open(&record, OpenMode::ReadWrite).unwrap();
    assert_eq!(
        rec.manifest().unwrap().manifest_exts["test_ext"],
        serde_json::json!("yeah!")
    );
    let first_uuid = rec.manifest().unwrap().manifest_uuid;

    // the next commit creates a fresh manifest but inherits the extensions
    rec.set("foo", 1i64).unwrap();
    rec.commit_patch().unwrap();
    let mf = rec.manifest().unwrap();
    assert_ne!(mf.manifest_uuid, first_uuid);
    assert_eq!(mf.manifest_exts["test_ext"], serde_json::json!("yeah!"));
    rec.close(true).unwrap();
}

#[test]
fn manifest_record_opens_as_plain_record() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let mut mf_files = Vec::new();

    let mut rec = MfRecord::create(&record).unwrap();
    rec.set("foo/bar", "hello").unwrap();
    rec.commit_patch().unwrap();
    mf_files.push(latest_manifest_path(&rec));
    rec.create_patch().unwrap();
    rec.set("foo/baz", "world").unwrap();
    rec.commit_patch().unwrap();
    mf_files.push(latest_manifest_path(&rec));
    assert!(!rec.ih5_meta().unwrap().last().unwrap().ub_exts.is_empty());
    rec.close(true).unwrap();

    // a manifest sidecar exists for each committed container
    for mf in &mf_files {
        assert!(mf.is_file());
    }

    // the plain record layer ignores manifests and extensions
    let rec = Record::open(&record, OpenMode::Read).unwrap();
    assert_eq!(
        rec.get_dataset("foo/bar").unwrap().value().unwrap(),
        Value::Str("hello".to_string())
    );
    assert_eq!(
        rec.get_dataset("foo/baz").unwrap().value().unwrap(),
        Value::Str("world".to_string())
    );
}

#[test]
fn commit_without_patch_fails() {
    let dir = tmp();
    let mut rec = MfRecord::create(&dir.path().join("ds")).unwrap();
    rec.commit_patch().unwrap();
    assert!(matches!(rec.commit_patch(), Err(Error::Lifecycle(_))));
    rec.close(true).unwrap();
}

#[test]
fn plain_patch_without_manifest_is_tolerated() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let mut rec = MfRecord::create(&record).unwrap();
    rec.commit_patch().unwrap();
    rec.close(true).unwrap();

    // a patch made through the plain record layer carries no manifest
    let mut rec = Record::open(&record, OpenMode::ReadWrite).unwrap();
    rec.set("x", 1i64).unwrap();
    rec.commit_patch().unwrap();
    rec.close(true).unwrap();

    let mut rec = MfRecord::open(&record, OpenMode::ReadWrite).unwrap();
    assert!(matches!(rec.manifest(), Err(Error::Lifecycle(_))));
    // committing the pending patch restores the manifest
    rec.commit_patch().unwrap();
    assert!(rec.manifest().is_ok());
    rec.close(true).unwrap();
}

#[test]
fn missing_manifest_sidecar_fails_open() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let mut rec = MfRecord::create(&record).unwrap();
    rec.commit_patch().unwrap();
    rec.create_patch().unwrap();
    rec.set("foo", 0i64).unwrap();
    rec.commit_patch().unwrap();
    let mf_path = latest_manifest_path(&rec);
    rec.close(true).unwrap();

    std::fs::remove_file(&mf_path).unwrap();
    assert!(matches!(
        MfRecord::open(&record, OpenMode::Read),
        Err(Error::ManifestMismatch { .. })
    ));
}

#[test]
fn modified_manifest_sidecar_fails_open() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let mut rec = MfRecord::create(&record).unwrap();
    rec.commit_patch().unwrap();
    rec.create_patch().unwrap();
    rec.set("foo", 0i64).unwrap();
    rec.commit_patch().unwrap();
    let mf_path = latest_manifest_path(&rec);
    rec.close(true).unwrap();

    std::fs::write(&mf_path, b"{}").unwrap();
    assert!(matches!(
        MfRecord::open(&record, OpenMode::Read),
        Err(Error::ManifestMismatch { .. })
    ));
}

#[test]
fn create_stub_from_manifest_and_patch() {
    let dir = tmp();
    let record = dir.path().join("ds");

    let mut rec = MfRecord::create(&record).unwrap();
    rec.set("foo/bar", "hello").unwrap();
    rec.commit_patch().unwrap();
    rec.create_patch().unwrap();
    rec.set("foo/baz", "world").unwrap();
    rec.commit_patch().unwrap();
    let mut files = rec.ih5_files().unwrap();
    let mf_path = latest_manifest_path(&rec);
    rec.close(true).unwrap();

    // on the "remote" side: create a stub and author a patch on top of it
    let stub_path = dir.path().join("stub");
    let mut stub = MfRecord::create_stub(&stub_path, &mf_path).unwrap();
    assert!(
        UbExtManifest::get(stub.ih5_meta().unwrap().last().unwrap())
            .unwrap()
            .unwrap()
            .is_stub_container
    );
    assert!(stub.get_dataset("foo/bar").unwrap().value().unwrap().is_empty());

    stub.create_patch().unwrap();
    stub.set("qux", "patch").unwrap();
    stub.commit_patch().unwrap();
    let stub_patch = stub.ih5_files().unwrap().last().unwrap().clone();
    let stub_mf = latest_manifest_path(&stub);
    stub.close(true).unwrap();

    // back home: apply the remote patch to the original record
    files.push(stub_patch);
    let combined = MfRecord::open_files(&files, false, false, Some(stub_mf.as_path())).unwrap();
    assert_eq!(
        combined.get_dataset("qux").unwrap().value().unwrap(),
        Value::Str("patch".to_string())
    );
    // the original data is intact, with the remote addition on top
    assert_eq!(
        combined.get_dataset("foo/bar").unwrap().value().unwrap(),
        Value::Str("hello".to_string())
    );
    assert_eq!(
        combined.get_dataset("foo/baz").unwrap().value().unwrap(),
        Value::Str("world".to_string())
    );
}

#[test]
fn stub_anywhere_but_base_fails_open() {
    let dir = tmp();
    let record = dir.path().join("ds");

    let mut rec = MfRecord::create(&record).unwrap();
    rec.set("foo", 1i64).unwrap();
    rec.commit_patch().unwrap();
    rec.create_patch().unwrap();
    rec.set("bar", 2i64).unwrap();
    rec.commit_patch().unwrap();
    let files = rec.ih5_files().unwrap();
    rec.close(true).unwrap();

    // flag the tail as a stub behind the record's back
    let patch = files.last().unwrap();
    let mut ub = ih5_core::UserBlock::load(patch).unwrap();
    let mut ext = UbExtManifest::get(&ub).unwrap().unwrap();
    ext.is_stub_container = true;
    ext.update(&mut ub);
    ub.save(patch).unwrap();

    assert!(matches!(
        MfRecord::open_files(&files, false, false, None),
        Err(Error::StubNotBase(_))
    ));
}

#[test]
fn merge_with_stub_fails() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let mut rec = MfRecord::create(&record).unwrap();
    rec.set("foo/bar", "hello").unwrap();
    rec.commit_patch().unwrap();
    let mf_path = latest_manifest_path(&rec);
    rec.close(true).unwrap();

    let stub_path = dir.path().join("stub");
    let mut stub = MfRecord::create_stub(&stub_path, &mf_path).unwrap();
    stub.create_patch().unwrap();
    stub.set("qux", "patch").unwrap();
    stub.commit_patch().unwrap();

    let err = stub.merge_files(dir.path().join("merged")).unwrap_err();
    match err {
        Error::Lifecycle(msg) => assert!(msg.contains("stub")),
        other => panic!("unexpected error: {other}"),
    }
    stub.close(true).unwrap();
}

#[test]
fn merge_preserves_manifest() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let target = dir.path().join("merged");

    let mut rec = MfRecord::create(&record).unwrap();
    rec.set("foo/bar", "hello").unwrap();
    let mut exts = BTreeMap::new();
    exts.insert("test_mfext".to_string(), serde_json::json!("hello"));
    rec.commit_with_exts(exts).unwrap();
    let mf_v1_uuid = rec.manifest().unwrap().manifest_uuid;

    rec.create_patch().unwrap();
    rec.set("foo/baz", "world").unwrap();
    rec.commit_patch().unwrap();
    let mf_v2 = rec.manifest().unwrap().clone();

    // fresh manifest per commit, inherited extension data
    assert_ne!(mf_v1_uuid, mf_v2.manifest_uuid);
    assert_eq!(mf_v2.manifest_exts["test_mfext"], serde_json::json!("hello"));

    let mut files = rec.ih5_files().unwrap();
    let mf1_path = latest_manifest_path(&rec);
    rec.merge_files(&target).unwrap();
    rec.close(true).unwrap();

    // the merged record opens as a manifest record with the same manifest
    let mut merged = MfRecord::open(&target, OpenMode::ReadWrite).unwrap();
    let mf2_path = latest_manifest_path(&merged);
    assert_eq!(
        Manifest::load(&mf1_path).unwrap(),
        Manifest::load(&mf2_path).unwrap()
    );
    assert_eq!(
        merged.manifest().unwrap().manifest_exts["test_mfext"],
        serde_json::json!("hello")
    );

    // a patch on top of the merged container applies to the original files
    merged.set("qux", 123i64).unwrap();
    merged.commit_patch().unwrap();
    files.push(merged.ih5_files().unwrap().last().unwrap().clone());
    merged.close(true).unwrap();

    let combined = MfRecord::open_files(&files, false, false, None).unwrap();
    assert_eq!(
        combined.get_dataset("qux").unwrap().value().unwrap(),
        Value::Int(123)
    );
    assert_eq!(
        combined.manifest().unwrap().manifest_exts["test_mfext"],
        serde_json::json!("hello")
    );
}

#[test]
fn sidecars_are_deleted_with_the_record() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let mut rec = MfRecord::create(&record).unwrap();
    rec.set("x", 1i64).unwrap();
    rec.commit_patch().unwrap();
    let mf_path = latest_manifest_path(&rec);
    rec.close(true).unwrap();
    assert!(mf_path.is_file());

    Record::delete_files(&record).unwrap();
    assert!(!mf_path.is_file());
    assert!(Record::find_files(&record).unwrap().is_empty());
}

#[test]
fn stub_sidecar_binds_to_stub_file() {
    // the stub writes its own manifest next to itself, so it passes the
    // same open-time validation as any other manifest record
    let dir = tmp();
    let record = dir.path().join("ds");
    let mut rec = MfRecord::create(&record).unwrap();
    rec.set("a", 1i64).unwrap();
    rec.commit_patch().unwrap();
    let mf_path = latest_manifest_path(&rec);
    rec.close(true).unwrap();

    let stub_path = dir.path().join("stub");
    let stub = MfRecord::create_stub(&stub_path, &mf_path).unwrap();
    let stub_mf = latest_manifest_path(&stub);
    assert!(stub_mf.is_file());
    drop(stub);

    let reopened = MfRecord::open(&stub_path, OpenMode::Read).unwrap();
    assert!(reopened.manifest().is_ok());
    assert_eq!(
        reopened.manifest().unwrap().skeleton.kinds().len(),
        1 // just the dataset "a"
    );
}
