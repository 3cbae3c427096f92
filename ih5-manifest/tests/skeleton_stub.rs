//! Tests for skeleton extraction and stub creation (decoupled from
//! manifest files).

use std::collections::BTreeMap;

use ih5_core::{Error, OpenMode, Record, Value};
use ih5_manifest::{init_stub_base, init_stub_skeleton, EntryKind, Skeleton, SkeletonEntry};

fn tmp() -> tempfile::TempDir {
    tempfile::tempdir().expect("create tempdir")
}

fn entry(kind: EntryKind, patch_index: u64) -> SkeletonEntry {
    SkeletonEntry { kind, patch_index }
}

#[test]
fn skeleton_of_record() {
    let dir = tmp();
    let rec = Record::create(&dir.path().join("ds")).unwrap();
    rec.set("foo/bar", "hello").unwrap();
    rec.attrs().unwrap().set("root_attr", 1i64).unwrap();
    rec.get("foo").unwrap().attrs().set("group_attr", 2i64).unwrap();
    rec.get("foo/bar").unwrap().attrs().set("dataset_attr", 3i64).unwrap();

    let skel = Skeleton::of_record(&rec).unwrap();
    let mut expected = BTreeMap::new();
    expected.insert("@root_attr".to_string(), entry(EntryKind::Attribute, 0));
    expected.insert("foo".to_string(), entry(EntryKind::Group, 0));
    expected.insert("foo@group_attr".to_string(), entry(EntryKind::Attribute, 0));
    expected.insert("foo/bar".to_string(), entry(EntryKind::Dataset, 0));
    expected.insert(
        "foo/bar@dataset_attr".to_string(),
        entry(EntryKind::Attribute, 0),
    );
    assert_eq!(skel.0, expected);
}

#[test]
fn skeleton_tracks_last_touched_patch() {
    let dir = tmp();
    let mut rec = Record::create(&dir.path().join("ds")).unwrap();
    rec.set("keep", 1i64).unwrap();
    rec.set("update", 1i64).unwrap();
    rec.commit_patch().unwrap();
    rec.create_patch().unwrap();
    rec.delete("update").unwrap();
    rec.set("update", 2i64).unwrap();
    rec.get("keep").unwrap().attrs().set("note", "new").unwrap();
    rec.commit_patch().unwrap();

    let skel = Skeleton::of_record(&rec).unwrap();
    assert_eq!(skel.get("keep").unwrap().patch_index, 0);
    assert_eq!(skel.get("update").unwrap().patch_index, 1);
    assert_eq!(skel.get("keep@note").unwrap().patch_index, 1);
    rec.close(true).unwrap();
}

#[test]
fn stub_skeleton_replay_is_order_independent() {
    let dir = tmp();
    // attribute entry precedes the dataset entry for the same path, and a
    // child dataset precedes its explicit parent group entry
    let mut entries = BTreeMap::new();
    entries.insert("foo@atr".to_string(), entry(EntryKind::Attribute, 0));
    entries.insert("foo".to_string(), entry(EntryKind::Dataset, 0));
    entries.insert("qux/bar".to_string(), entry(EntryKind::Dataset, 0));
    entries.insert("qux".to_string(), entry(EntryKind::Group, 0));
    let skel = Skeleton(entries);

    let mut rec = Record::create(&dir.path().join("ds")).unwrap();
    init_stub_skeleton(&mut rec, &skel).unwrap();

    let foo = rec.get_dataset("foo").unwrap();
    assert!(foo.value().unwrap().is_empty());
    assert!(foo.attrs().get("atr").unwrap().is_empty());
    assert!(rec.get("qux").unwrap().is_group());
    assert!(rec.get("qux/bar").unwrap().is_dataset());
    rec.close(true).unwrap();
}

#[test]
fn stub_init_requires_empty_record() {
    let dir = tmp();
    let mut rec = Record::create(&dir.path().join("ds")).unwrap();
    rec.set("bar", "not empty anymore").unwrap();

    let mut entries = BTreeMap::new();
    entries.insert("foo".to_string(), entry(EntryKind::Dataset, 0));
    assert!(matches!(
        init_stub_skeleton(&mut rec, &Skeleton(entries)),
        Err(Error::Lifecycle(_))
    ));
    rec.close(true).unwrap();
}

#[test]
fn patch_on_stub_works_with_real_record() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let stub_path = dir.path().join("stub");

    // a normal record with multiple patches
    let mut rec = Record::create(&record).unwrap();
    rec.set("foo/bar", vec![1i64, 2, 3]).unwrap();
    rec.commit_patch().unwrap();
    rec.create_patch().unwrap();
    rec.get("foo/bar").unwrap().attrs().set("qux", 42i64).unwrap();
    rec.set("data", "interesting data").unwrap();
    rec.commit_patch().unwrap();
    rec.create_patch().unwrap();
    rec.get("data").unwrap().attrs().set("key", "value").unwrap();
    rec.set("foo/muh", 1337i64).unwrap();
    rec.set("foo/tokill", "this will be deleted").unwrap();
    rec.commit_patch().unwrap();

    let ds_files = rec.ih5_files().unwrap();
    let ds_ub = rec.ih5_meta().unwrap().last().unwrap().clone();
    let ds_skel = Skeleton::of_record(&rec).unwrap();

    // create the stub faking this record
    let mut stub = Record::create(&stub_path).unwrap();
    init_stub_base(&mut stub, &ds_ub, &ds_skel).unwrap();
    assert!(!stub.has_writable_patch());

    // agreement on the relevant user block infos
    let stub_ub = stub.ih5_meta().unwrap()[0].clone();
    assert_eq!(stub_ub.record_uuid, ds_ub.record_uuid);
    assert_eq!(stub_ub.patch_uuid, ds_ub.patch_uuid);
    assert_eq!(stub_ub.patch_index, ds_ub.patch_index);
    assert_eq!(stub_ub.prev_patch, None);
    // and on the structure
    assert_eq!(
        Skeleton::of_record(&stub).unwrap().kinds(),
        ds_skel.kinds()
    );

    // create a new patch on top of the stub
    stub.create_patch().unwrap();
    stub.delete("foo/tokill").unwrap();
    stub.delete("foo/bar").unwrap();
    stub.set("/foo/bar/blub", true).unwrap();
    stub.get("data").unwrap().attrs().set("key2", "othervalue").unwrap();
    stub.get("foo/bar").unwrap().attrs().set("qax", 987i64).unwrap();
    stub.commit_patch().unwrap();

    assert_eq!(stub.ih5_files().unwrap().len(), 2);
    let stub_patch = stub.ih5_files().unwrap().last().unwrap().clone();
    let stub_skel = Skeleton::of_record(&stub).unwrap();
    let expected_kinds: BTreeMap<&str, EntryKind> = [
        ("data", EntryKind::Dataset),
        ("data@key", EntryKind::Attribute),
        ("data@key2", EntryKind::Attribute),
        ("foo", EntryKind::Group),
        ("foo/bar", EntryKind::Group),
        ("foo/bar@qax", EntryKind::Attribute),
        ("foo/bar/blub", EntryKind::Dataset),
        ("foo/muh", EntryKind::Dataset),
    ]
    .into_iter()
    .collect();
    assert_eq!(stub_skel.kinds(), expected_kinds);
    stub.close(true).unwrap();
    rec.close(true).unwrap();

    // open the real record together with the patch authored on the stub
    let mut combined_files = ds_files.clone();
    combined_files.push(stub_patch);
    let combined = Record::open_files(&combined_files, false, false).unwrap();

    assert_eq!(
        Skeleton::of_record(&combined).unwrap().kinds(),
        stub_skel.kinds()
    );
    // attributes merged, values as expected, with the real data present
    let data_attrs = combined.get("data").unwrap().attrs();
    assert_eq!(
        data_attrs.keys().unwrap(),
        vec!["key".to_string(), "key2".to_string()]
    );
    assert_eq!(
        combined.get("foo/bar").unwrap().attrs().keys().unwrap(),
        vec!["qax".to_string()]
    );
    assert!(combined.contains("foo/muh").unwrap());
    assert!(combined.contains("foo/bar/blub").unwrap());
    assert_eq!(
        combined.get_dataset("foo/muh").unwrap().value().unwrap(),
        Value::Int(1337)
    );
    assert_eq!(
        combined.get_dataset("data").unwrap().value().unwrap(),
        Value::Str("interesting data".to_string())
    );
}

#[test]
fn stub_holds_no_data() {
    let dir = tmp();
    let record = dir.path().join("ds");
    let stub_path = dir.path().join("stub");

    let mut rec = Record::create(&record).unwrap();
    rec.set("big", Value::Bytes(vec![0xAB; 4096])).unwrap();
    rec.attrs().unwrap().set("meta", "payload").unwrap();
    rec.commit_patch().unwrap();
    let ub = rec.ih5_meta().unwrap()[0].clone();
    let skel = Skeleton::of_record(&rec).unwrap();
    rec.close(true).unwrap();

    let mut stub = Record::create(&stub_path).unwrap();
    init_stub_base(&mut stub, &ub, &skel).unwrap();

    assert!(stub.get_dataset("big").unwrap().value().unwrap().is_empty());
    assert!(stub.attrs().unwrap().get("meta").unwrap().is_empty());
    drop(stub);

    // and the stub file is far smaller than the original
    let real_size = std::fs::metadata(ih5_core::naming::base_path(&record))
        .unwrap()
        .len();
    let stub_size = std::fs::metadata(ih5_core::naming::base_path(&stub_path))
        .unwrap()
        .len();
    assert!(stub_size < real_size);

    // a stub is a valid, openable record on its own
    let reopened = Record::open(&stub_path, OpenMode::Read).unwrap();
    assert!(reopened.contains("big").unwrap());
}
