use std::collections::HashMap;
use std::path::PathBuf;

use mirrorkeep_core::model::{Directory, File};
use mirrorkeep_core::storage::MetadataStore;

const SET: &str = "unit-set";

fn make_file(name: &str, size: u64, crc: u32) -> File {
    File {
        path: PathBuf::from("/mnt/a/docs"),
        name: name.to_string(),
        size,
        modified: 1_700_000_000,
        fingerprint: crc,
        last_checked: 0,
    }
}

fn make_directory(name: &str, files: &[File]) -> Directory {
    let map: HashMap<String, File> = files
        .iter()
        .map(|f| (f.name.clone(), f.clone()))
        .collect();
    Directory::new(PathBuf::from("/mnt/a/docs"), name.to_string(), map)
}

#[test]
fn insert_directory_cascades_and_is_idempotent() {
    let store = MetadataStore::open_in_memory().unwrap();
    let dir = make_directory("/docs", &[make_file("a.txt", 10, 1), make_file("b.txt", 20, 2)]);

    store.insert_directory(SET, &dir, 500).unwrap();
    store.insert_directory(SET, &dir, 500).unwrap();

    let fetched = store.get(SET, "/docs").unwrap().unwrap();
    assert_eq!(fetched.files.len(), 2);
    assert_eq!(fetched.files["a.txt"].size, 10);
    assert_eq!(fetched.files["a.txt"].last_checked, 500);

    let count: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM directory", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn get_unknown_directory_is_none() {
    let store = MetadataStore::open_in_memory().unwrap();
    assert!(store.get(SET, "/nowhere").unwrap().is_none());
    assert!(!store.directory_exists(SET, "/nowhere").unwrap());
}

#[test]
fn insert_file_is_idempotent() {
    let store = MetadataStore::open_in_memory().unwrap();
    let file = make_file("solo.txt", 42, 0xBEEF);

    store.insert_file(SET, "/docs", &file, 100).unwrap();
    store.insert_file(SET, "/docs", &file, 100).unwrap();

    assert!(store.file_exists(SET, "/docs", "solo.txt").unwrap());
    let count: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM file", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn update_file_requires_existing_row() {
    let store = MetadataStore::open_in_memory().unwrap();
    let file = make_file("ghost.txt", 1, 1);

    // Precondition, not an upsert.
    assert!(store.update_file(SET, "/docs", &file, 100).is_err());

    store.insert_file(SET, "/docs", &file, 100).unwrap();
    let mut changed = file.clone();
    changed.size = 99;
    changed.fingerprint = 7;
    store.update_file(SET, "/docs", &changed, 200).unwrap();

    let fetched = store.get(SET, "/docs").unwrap().unwrap();
    assert_eq!(fetched.files["ghost.txt"].size, 99);
    assert_eq!(fetched.files["ghost.txt"].fingerprint, 7);
    assert_eq!(fetched.files["ghost.txt"].last_checked, 200);
}

#[test]
fn mirror_sets_are_disjoint_namespaces() {
    let store = MetadataStore::open_in_memory().unwrap();
    let dir = make_directory("/shared", &[make_file("x.txt", 1, 1)]);

    store.insert_directory("set-one", &dir, 100).unwrap();

    assert!(store.directory_exists("set-one", "/shared").unwrap());
    assert!(!store.directory_exists("set-two", "/shared").unwrap());
    assert!(store.get("set-two", "/shared").unwrap().is_none());
}

#[test]
fn prune_removes_stale_rows_and_empty_directories() {
    let store = MetadataStore::open_in_memory().unwrap();
    let kept = make_directory("/kept", &[make_file("fresh.txt", 1, 1)]);
    let stale = make_directory("/stale", &[make_file("old.txt", 1, 2)]);

    store.insert_directory(SET, &kept, 1_000).unwrap();
    store.insert_directory(SET, &stale, 1_000).unwrap();

    // Simulate the next pass touching only /kept.
    store
        .update_file(SET, "/kept", &kept.files["fresh.txt"], 2_000)
        .unwrap();

    let removed = store.prune(SET, 2_000).unwrap();
    assert_eq!(removed, 1);

    assert!(store.file_exists(SET, "/kept", "fresh.txt").unwrap());
    assert!(!store.file_exists(SET, "/stale", "old.txt").unwrap());
    assert!(!store.directory_exists(SET, "/stale").unwrap());
}

#[test]
fn prune_is_scoped_to_the_mirror_set() {
    let store = MetadataStore::open_in_memory().unwrap();
    let dir = make_directory("/d", &[make_file("f.txt", 1, 1)]);

    store.insert_directory("set-one", &dir, 1_000).unwrap();
    store.insert_directory("set-two", &dir, 1_000).unwrap();

    let removed = store.prune("set-one", 2_000).unwrap();
    assert_eq!(removed, 1);
    assert!(store.file_exists("set-two", "/d", "f.txt").unwrap());
}

#[test]
fn divergences_are_recorded_and_readable() {
    let store = MetadataStore::open_in_memory().unwrap();

    store
        .record_divergence(SET, "ambiguous", "/d/f.txt: crc mismatch")
        .unwrap();
    store
        .record_divergence(SET, "structure", "/a | /b")
        .unwrap();

    let records = store.unresolved_divergences(SET).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, "ambiguous");
    assert_eq!(records[1].kind, "structure");
    assert!(!records[0].resolved);

    assert!(store.unresolved_divergences("other-set").unwrap().is_empty());
}

#[test]
fn resolving_a_divergence_removes_it_from_the_unresolved_view() {
    let store = MetadataStore::open_in_memory().unwrap();

    store
        .record_divergence(SET, "ambiguous", "/d/f.txt: crc mismatch")
        .unwrap();
    store
        .record_divergence(SET, "structure", "/a | /b")
        .unwrap();

    let records = store.unresolved_divergences(SET).unwrap();
    assert_eq!(records.len(), 2);

    store.resolve_divergence(records[0].id).unwrap();

    let remaining = store.unresolved_divergences(SET).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, "structure");

    // Unknown id is a precondition failure, not a silent no-op.
    assert!(store.resolve_divergence(9999).is_err());
}

#[test]
fn drop_all_wipes_every_table() {
    let store = MetadataStore::open_in_memory().unwrap();
    let dir = make_directory("/d", &[make_file("f.txt", 1, 1)]);
    store.insert_directory(SET, &dir, 100).unwrap();
    store.record_divergence(SET, "ambiguous", "detail").unwrap();

    store.drop_all().unwrap();

    for table in ["directory", "file", "divergence"] {
        let count: i64 = store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0, "table {} not empty", table);
    }
}
