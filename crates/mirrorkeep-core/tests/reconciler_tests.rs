use std::fs;
use std::path::Path;
use std::sync::Arc;

use mirrorkeep_core::checksum::Crc32;
use mirrorkeep_core::crawler::Disk;
use mirrorkeep_core::model::Directory;
use mirrorkeep_core::reconciler::{Reconciler, StepOutcome};
use mirrorkeep_core::storage::MetadataStore;
use mirrorkeep_core::transfer::ByteCopier;
use tempfile::tempdir;

const SET: &str = "test-set";

fn reconciler() -> Reconciler {
    let store = MetadataStore::open_in_memory().unwrap();
    Reconciler::new(SET, store, Box::new(ByteCopier))
}

fn disks(mounts: &[&Path]) -> Vec<Disk> {
    mounts
        .iter()
        .map(|m| Disk::new(*m, Arc::new(Crc32)))
        .collect()
}

fn step(disks: &mut [Disk]) -> Vec<Option<Directory>> {
    disks.iter_mut().map(|d| d.next_directory()).collect()
}

/// Drive a full pass over the mirrors and prune afterwards.
fn run_pass(rec: &Reconciler, mounts: &[&Path], now: i64) {
    let mut ds = disks(mounts);
    loop {
        let mut batch = step(&mut ds);
        match rec.reconcile_step(&mut batch, now) {
            StepOutcome::PassComplete => break,
            StepOutcome::Progress(_) => {}
        }
    }
    let _ = rec.store().prune(SET, now);
}

#[test]
fn repairs_missing_file_byte_identically() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    fs::write(a.path().join("keep.txt"), "present on both").unwrap();
    fs::write(b.path().join("keep.txt"), "present on both").unwrap();
    fs::write(a.path().join("only_a.txt"), "missing from b").unwrap();

    let rec = reconciler();
    let mut ds = disks(&[a.path(), b.path()]);
    let mut batch = step(&mut ds);

    let outcome = rec.reconcile_step(&mut batch, 1_000);
    match outcome {
        StepOutcome::Progress(report) => {
            assert!(report.aligned);
            assert_eq!(report.copies, 1);
            assert_eq!(report.copy_failures, 0);
        }
        StepOutcome::PassComplete => panic!("expected progress"),
    }

    assert_eq!(
        fs::read(b.path().join("only_a.txt")).unwrap(),
        b"missing from b"
    );
}

#[test]
fn repair_is_symmetric() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    fs::write(a.path().join("only_a.txt"), "a side").unwrap();
    fs::write(b.path().join("only_b.txt"), "b side").unwrap();

    let rec = reconciler();
    let mut ds = disks(&[a.path(), b.path()]);
    let mut batch = step(&mut ds);
    rec.reconcile_step(&mut batch, 1_000);

    assert_eq!(fs::read(a.path().join("only_b.txt")).unwrap(), b"b side");
    assert_eq!(fs::read(b.path().join("only_a.txt")).unwrap(), b"a side");
}

#[test]
fn reconciliation_is_idempotent_on_synced_mirrors() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    for m in [a.path(), b.path()] {
        fs::write(m.join("same.txt"), "identical everywhere").unwrap();
    }

    let rec = reconciler();
    run_pass(&rec, &[a.path(), b.path()], 1_000);

    // Second pass over already-synced mirrors: no copies, no new rows,
    // only last_checked moves.
    let before = rec.store().get(SET, "/").unwrap().unwrap();
    let mut ds = disks(&[a.path(), b.path()]);
    let mut batch = step(&mut ds);
    match rec.reconcile_step(&mut batch, 2_000) {
        StepOutcome::Progress(report) => {
            assert_eq!(report.copies, 0);
            assert_eq!(report.copy_failures, 0);
            assert_eq!(report.flagged, 0);
        }
        StepOutcome::PassComplete => panic!("expected progress"),
    }

    let after = rec.store().get(SET, "/").unwrap().unwrap();
    assert_eq!(before.files.len(), after.files.len());
    let f_before = &before.files["same.txt"];
    let f_after = &after.files["same.txt"];
    assert_eq!(f_before.fingerprint, f_after.fingerprint);
    assert_eq!(f_before.size, f_after.size);
    assert_eq!(f_after.last_checked, 2_000);
}

#[test]
fn store_fingerprint_breaks_corruption_tie() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    for m in [a.path(), b.path()] {
        fs::write(m.join("data.bin"), "good content").unwrap();
    }

    let rec = reconciler();
    // First pass records the known-good fingerprint.
    run_pass(&rec, &[a.path(), b.path()], 1_000);

    // Silent corruption on mirror b.
    fs::write(b.path().join("data.bin"), "rotted bits!").unwrap();

    let mut ds = disks(&[a.path(), b.path()]);
    let mut batch = step(&mut ds);
    match rec.reconcile_step(&mut batch, 2_000) {
        StepOutcome::Progress(report) => {
            assert_eq!(report.copies, 1);
            assert_eq!(report.flagged, 0);
        }
        StepOutcome::PassComplete => panic!("expected progress"),
    }

    assert_eq!(fs::read(b.path().join("data.bin")).unwrap(), b"good content");
    // The store still holds the good fingerprint.
    let stored = rec.store().get(SET, "/").unwrap().unwrap();
    assert_eq!(
        stored.files["data.bin"].fingerprint,
        crc32fast::hash(b"good content")
    );
}

#[test]
fn ambiguous_mismatch_is_flagged_and_left_alone() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    fs::write(a.path().join("conflict.txt"), "version alpha").unwrap();
    fs::write(b.path().join("conflict.txt"), "version beta!").unwrap();

    // No prior store record exists, so neither side can be authoritative.
    let rec = reconciler();
    let mut ds = disks(&[a.path(), b.path()]);
    let mut batch = step(&mut ds);
    match rec.reconcile_step(&mut batch, 1_000) {
        StepOutcome::Progress(report) => {
            assert_eq!(report.copies, 0);
            assert_eq!(report.flagged, 1);
        }
        StepOutcome::PassComplete => panic!("expected progress"),
    }

    // Neither mirror was touched.
    assert_eq!(fs::read(a.path().join("conflict.txt")).unwrap(), b"version alpha");
    assert_eq!(fs::read(b.path().join("conflict.txt")).unwrap(), b"version beta!");

    let flagged = rec.store().unresolved_divergences(SET).unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].kind, "ambiguous");
}

#[test]
fn structural_mismatch_skips_file_repair() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    // Different subdirectory structure below the root.
    fs::create_dir_all(a.path().join("photos")).unwrap();
    fs::create_dir_all(b.path().join("documents")).unwrap();
    fs::write(a.path().join("photos/p.jpg"), "pic").unwrap();
    fs::write(b.path().join("documents/d.txt"), "doc").unwrap();

    let rec = reconciler();
    let mut ds = disks(&[a.path(), b.path()]);
    let mut batch = step(&mut ds);
    let outcome = rec.reconcile_step(&mut batch, 1_000);

    match outcome {
        StepOutcome::Progress(report) => {
            assert!(!report.aligned);
            assert_eq!(report.copies, 0);
            assert_eq!(report.flagged, 1);
        }
        StepOutcome::PassComplete => panic!("expected progress"),
    }

    // No files were copied across.
    assert!(!b.path().join("photos").exists());
    assert!(!a.path().join("documents").exists());

    let flagged = rec.store().unresolved_divergences(SET).unwrap();
    assert_eq!(flagged[0].kind, "structure");
}

#[test]
fn pass_completes_when_all_mirrors_are_exhausted() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    fs::write(a.path().join("one.txt"), "x").unwrap();
    fs::write(b.path().join("one.txt"), "x").unwrap();

    let rec = reconciler();
    let mut ds = disks(&[a.path(), b.path()]);

    let mut batch = step(&mut ds);
    assert!(matches!(
        rec.reconcile_step(&mut batch, 1_000),
        StepOutcome::Progress(_)
    ));

    let mut batch = step(&mut ds);
    assert_eq!(rec.reconcile_step(&mut batch, 1_000), StepOutcome::PassComplete);
}

#[test]
fn prune_removes_only_stale_records() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    for m in [a.path(), b.path()] {
        fs::write(m.join("stays.txt"), "still here").unwrap();
        fs::write(m.join("goes.txt"), "about to vanish").unwrap();
    }

    let rec = reconciler();
    run_pass(&rec, &[a.path(), b.path()], 1_000);
    assert!(rec.store().file_exists(SET, "/", "goes.txt").unwrap());

    // File disappears from every mirror before the next pass.
    fs::remove_file(a.path().join("goes.txt")).unwrap();
    fs::remove_file(b.path().join("goes.txt")).unwrap();

    run_pass(&rec, &[a.path(), b.path()], 2_000);

    assert!(rec.store().file_exists(SET, "/", "stays.txt").unwrap());
    assert!(!rec.store().file_exists(SET, "/", "goes.txt").unwrap());
}

#[test]
fn new_files_are_inserted_not_updated() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    for m in [a.path(), b.path()] {
        fs::write(m.join("old.txt"), "already known").unwrap();
    }

    let rec = reconciler();
    run_pass(&rec, &[a.path(), b.path()], 1_000);

    for m in [a.path(), b.path()] {
        fs::write(m.join("new.txt"), "just arrived").unwrap();
    }
    run_pass(&rec, &[a.path(), b.path()], 2_000);

    let stored = rec.store().get(SET, "/").unwrap().unwrap();
    assert_eq!(stored.files.len(), 2);
    assert_eq!(stored.files["new.txt"].last_checked, 2_000);
    assert_eq!(stored.files["old.txt"].last_checked, 2_000);
}
