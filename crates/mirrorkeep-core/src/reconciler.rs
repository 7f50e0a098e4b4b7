use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::model::{Directory, File};
use crate::storage::MetadataStore;
use crate::transfer::Transfer;

/// Result of one reconciliation step over the current directory batch.
#[derive(Debug, PartialEq)]
pub enum StepOutcome {
    /// At least one mirror produced a directory; the pass continues.
    Progress(StepReport),
    /// Every mirror's crawler was exhausted in this step.
    PassComplete,
}

#[derive(Debug, Default, PartialEq)]
pub struct StepReport {
    /// Whether all mirrors produced the same logical directory.
    pub aligned: bool,
    /// Repair copies performed.
    pub copies: usize,
    /// Repair copies that failed (logged, step continued).
    pub copy_failures: usize,
    /// Divergences recorded for manual reconciliation.
    pub flagged: usize,
}

/// Brings the mirrors of one set to matching content, one logical
/// directory per step, and keeps the metadata store in sync.
pub struct Reconciler {
    mirror_set: String,
    store: MetadataStore,
    transfer: Box<dyn Transfer>,
}

impl Reconciler {
    pub fn new(mirror_set: impl Into<String>, store: MetadataStore, transfer: Box<dyn Transfer>) -> Self {
        Reconciler {
            mirror_set: mirror_set.into(),
            store,
            transfer,
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// One reconciliation step: `batch` holds the current directory from
    /// each mirror's crawler (None = that crawler is exhausted), all
    /// advanced in lockstep. `now` stamps last_checked for every file seen.
    pub fn reconcile_step(&self, batch: &mut [Option<Directory>], now: i64) -> StepOutcome {
        if batch.iter().all(|d| d.is_none()) {
            return StepOutcome::PassComplete;
        }

        let mut report = StepReport::default();

        if !self.check_alignment(batch, &mut report) {
            // Directory structure diverged; file-level repair is out of
            // automatic scope for this step. Each directory still gets its
            // store rows refreshed so a later prune cannot eat valid files.
            for dir in batch.iter().flatten() {
                self.sync_directory(dir, now);
            }
            return StepOutcome::Progress(report);
        }

        self.diff_and_repair(batch, &mut report);
        self.sync_aligned(batch, now);

        StepOutcome::Progress(report)
    }

    /// Remove store rows not refreshed during the pass that started at
    /// `pass_started_at`. Only called after full-pass completion.
    pub fn finish_pass(&self, pass_started_at: i64) -> usize {
        match self.store.prune(&self.mirror_set, pass_started_at) {
            Ok(removed) => {
                if removed > 0 {
                    info!(
                        "Pass complete for set '{}': pruned {} stale records",
                        self.mirror_set, removed
                    );
                }
                removed
            }
            Err(err) => {
                warn!("Prune failed for set '{}': {}", self.mirror_set, err);
                0
            }
        }
    }

    /// True when every mirror produced a directory and all carry the same
    /// logical name. Any other shape is a structural divergence.
    fn check_alignment(&self, batch: &[Option<Directory>], report: &mut StepReport) -> bool {
        let names: Vec<Option<&str>> = batch
            .iter()
            .map(|d| d.as_ref().map(|d| d.name.as_str()))
            .collect();

        let aligned = names.iter().all(|n| n.is_some() && *n == names[0]);
        report.aligned = aligned;

        if !aligned {
            let detail = names
                .iter()
                .map(|n| n.unwrap_or("<exhausted>"))
                .collect::<Vec<_>>()
                .join(" | ");
            warn!(
                "Mirror set '{}' has diverged in directory structure: {}",
                self.mirror_set, detail
            );
            self.flag(report, "structure", &detail);
        }

        aligned
    }

    /// Pairwise, symmetric file diff across adjacent mirrors: missing
    /// files are copied over, content mismatches are resolved against the
    /// store's last-known-good fingerprint.
    fn diff_and_repair(&self, batch: &mut [Option<Directory>], report: &mut StepReport) {
        for i in 0..batch.len().saturating_sub(1) {
            let names: BTreeSet<String> = {
                let a = batch[i].as_ref().expect("aligned batch");
                let b = batch[i + 1].as_ref().expect("aligned batch");
                a.files.keys().chain(b.files.keys()).cloned().collect()
            };

            for name in names {
                let in_a = batch[i].as_ref().expect("aligned batch").files.contains_key(&name);
                let in_b = batch[i + 1].as_ref().expect("aligned batch").files.contains_key(&name);

                match (in_a, in_b) {
                    (true, false) => self.repair_missing(batch, i, i + 1, &name, report),
                    (false, true) => self.repair_missing(batch, i + 1, i, &name, report),
                    (true, true) => self.resolve_mismatch(batch, i, i + 1, &name, report),
                    (false, false) => unreachable!(),
                }
            }
        }
    }

    /// Copy `name` from the mirror at `src_idx` to the one at `dst_idx`,
    /// which is missing it. On success the destination directory adopts
    /// the source's file record so the store sees it this step.
    fn repair_missing(
        &self,
        batch: &mut [Option<Directory>],
        src_idx: usize,
        dst_idx: usize,
        name: &str,
        report: &mut StepReport,
    ) {
        let (src_file, dst_dir_path) = {
            let src = batch[src_idx].as_ref().expect("aligned batch");
            let dst = batch[dst_idx].as_ref().expect("aligned batch");
            (src.files[name].clone(), dst.path.clone())
        };

        let src_path = src_file.full_path();
        let dst_path = dst_dir_path.join(name);

        info!(
            "Repairing missing file: {} -> {}",
            src_path.display(),
            dst_path.display()
        );

        match self.transfer.copy(&src_path, &dst_path) {
            Ok(_) => {
                report.copies += 1;
                let mut repaired = src_file;
                repaired.path = dst_dir_path;
                batch[dst_idx]
                    .as_mut()
                    .expect("aligned batch")
                    .files
                    .insert(name.to_string(), repaired);
            }
            Err(err) => {
                warn!(
                    "Copy failed: {} -> {}: {}",
                    src_path.display(),
                    dst_path.display(),
                    err
                );
                report.copy_failures += 1;
            }
        }
    }

    /// `name` exists on both mirrors. Equal Files need nothing. Matching
    /// fingerprints with differing size/mtime are benign. On a fingerprint
    /// disagreement the store's last-known-good fingerprint decides which
    /// side is authoritative; without corroborating evidence the conflict
    /// is flagged and left alone.
    fn resolve_mismatch(
        &self,
        batch: &mut [Option<Directory>],
        a_idx: usize,
        b_idx: usize,
        name: &str,
        report: &mut StepReport,
    ) {
        let (dir_name, a, b) = {
            let da = batch[a_idx].as_ref().expect("aligned batch");
            let db = batch[b_idx].as_ref().expect("aligned batch");
            (da.name.clone(), da.files[name].clone(), db.files[name].clone())
        };

        if a == b {
            return;
        }

        if a.fingerprint == b.fingerprint {
            // Same content, trivially different size/mtime metadata.
            debug!(
                "Benign metadata drift for {}/{} in set '{}'",
                dir_name, name, self.mirror_set
            );
            return;
        }

        let known_good = self
            .store
            .get(&self.mirror_set, &dir_name)
            .ok()
            .flatten()
            .and_then(|d| d.files.get(name).map(|f| f.fingerprint));

        match known_good {
            Some(good) if good == a.fingerprint => {
                info!(
                    "Corruption detected: {} diverged from last-known-good, restoring from {}",
                    b.full_path().display(),
                    a.full_path().display()
                );
                self.overwrite(batch, a_idx, b_idx, name, report);
            }
            Some(good) if good == b.fingerprint => {
                info!(
                    "Corruption detected: {} diverged from last-known-good, restoring from {}",
                    a.full_path().display(),
                    b.full_path().display()
                );
                self.overwrite(batch, b_idx, a_idx, name, report);
            }
            _ => {
                // Neither side matches (or no record): ambiguous corruption
                // must not be auto-resolved.
                let detail = format!(
                    "{}/{}: {} crc={:08x} vs {} crc={:08x}",
                    dir_name,
                    name,
                    a.full_path().display(),
                    a.fingerprint,
                    b.full_path().display(),
                    b.fingerprint
                );
                warn!(
                    "Ambiguous content mismatch in set '{}', manual resolution required: {}",
                    self.mirror_set, detail
                );
                self.flag(report, "ambiguous", &detail);
            }
        }
    }

    /// Copy the authoritative file over the corrupted one.
    fn overwrite(
        &self,
        batch: &mut [Option<Directory>],
        src_idx: usize,
        dst_idx: usize,
        name: &str,
        report: &mut StepReport,
    ) {
        let src_file = batch[src_idx].as_ref().expect("aligned batch").files[name].clone();
        let dst_dir_path = batch[dst_idx].as_ref().expect("aligned batch").path.clone();
        let dst_path = dst_dir_path.join(name);

        match self.transfer.copy(&src_file.full_path(), &dst_path) {
            Ok(_) => {
                report.copies += 1;
                let mut repaired = src_file;
                repaired.path = dst_dir_path;
                batch[dst_idx]
                    .as_mut()
                    .expect("aligned batch")
                    .files
                    .insert(name.to_string(), repaired);
            }
            Err(err) => {
                warn!(
                    "Restore copy failed: {} -> {}: {}",
                    src_file.full_path().display(),
                    dst_path.display(),
                    err
                );
                report.copy_failures += 1;
            }
        }
    }

    /// Store sync for an aligned batch, one upsert per logical file name.
    /// When the mirrors still disagree on a fingerprint after repair (the
    /// ambiguous case) only last_checked is refreshed, keeping the stored
    /// last-known-good fingerprint as tie-break evidence; new files are
    /// inserted and agreed files updated outright.
    fn sync_aligned(&self, batch: &[Option<Directory>], now: i64) {
        let dir_name = match batch.iter().flatten().next() {
            Some(d) => d.name.clone(),
            None => return,
        };

        if let Err(err) = self.store.insert_directory_row(&self.mirror_set, &dir_name) {
            warn!("Store insert failed for '{}': {}", dir_name, err);
            return;
        }

        let stored = self.store.get(&self.mirror_set, &dir_name).ok().flatten();

        let names: BTreeSet<String> = batch
            .iter()
            .flatten()
            .flat_map(|d| d.files.keys().cloned())
            .collect();

        for name in names {
            let copies: Vec<&File> = batch
                .iter()
                .flatten()
                .filter_map(|d| d.files.get(&name))
                .collect();

            let agreed = copies
                .windows(2)
                .all(|w| w[0].fingerprint == w[1].fingerprint);

            let stored_file = stored.as_ref().and_then(|d| d.files.get(&name));

            let result = match (agreed, stored_file) {
                (true, None) => {
                    self.store
                        .insert_file(&self.mirror_set, &dir_name, copies[0], now)
                }
                (true, Some(_)) => {
                    self.store
                        .update_file(&self.mirror_set, &dir_name, copies[0], now)
                }
                // Unresolved conflict: touch the record, keep its fields.
                (false, Some(prev)) => {
                    self.store.update_file(&self.mirror_set, &dir_name, prev, now)
                }
                // Unresolved conflict with no evidence: nothing safe to record.
                (false, None) => Ok(()),
            };

            if let Err(err) = result {
                warn!("Store sync failed for {}/{}: {}", dir_name, name, err);
            }
        }
    }

    /// Plain per-directory sync used on structurally diverged steps, where
    /// no cross-mirror agreement exists to reason about.
    fn sync_directory(&self, dir: &Directory, now: i64) {
        let stored = self.store.get(&self.mirror_set, &dir.name).ok().flatten();

        for file in dir.files.values() {
            let known = stored
                .as_ref()
                .map(|d| d.files.contains_key(&file.name))
                .unwrap_or(false);

            let result = if known {
                self.store.update_file(&self.mirror_set, &dir.name, file, now)
            } else {
                self.store.insert_file(&self.mirror_set, &dir.name, file, now)
            };

            if let Err(err) = result {
                warn!("Store sync failed for {}/{}: {}", dir.name, file.name, err);
            }
        }
    }

    fn flag(&self, report: &mut StepReport, kind: &str, detail: &str) {
        report.flagged += 1;
        if let Err(err) = self.store.record_divergence(&self.mirror_set, kind, detail) {
            warn!("Failed to record divergence: {}", err);
        }
    }
}
