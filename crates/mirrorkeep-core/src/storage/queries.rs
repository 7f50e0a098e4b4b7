use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::{params, OptionalExtension, Result};
use tracing::debug;

use super::sqlite::MetadataStore;
use crate::model::{Directory, File};

/// A persisted divergence awaiting manual reconciliation.
#[derive(Debug, Clone)]
pub struct DivergenceRecord {
    pub id: i64,
    pub mirror_set: String,
    pub detected_at: String,
    pub kind: String,
    pub detail: String,
    pub resolved: bool,
}

impl MetadataStore {
    // ── Directories ──────────────────────────────────────────────

    fn directory_id(&self, mirror_set: &str, name: &str) -> Result<Option<i64>> {
        self.connection()
            .query_row(
                "SELECT id FROM directory WHERE mirror_set = ?1 AND name = ?2",
                params![mirror_set, name],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn directory_exists(&self, mirror_set: &str, name: &str) -> Result<bool> {
        Ok(self.directory_id(mirror_set, name)?.is_some())
    }

    /// Fetch the stored projection of a logical directory, with its files.
    /// File `path` fields carry the logical directory name; equality never
    /// looks at them.
    pub fn get(&self, mirror_set: &str, name: &str) -> Result<Option<Directory>> {
        let Some(dir_id) = self.directory_id(mirror_set, name)? else {
            return Ok(None);
        };

        let mut stmt = self.connection().prepare_cached(
            "SELECT name, size, modified, fingerprint, last_checked \
             FROM file WHERE directory_id = ?1",
        )?;
        let rows = stmt.query_map(params![dir_id], |row| {
            Ok(File {
                path: PathBuf::from(name),
                name: row.get(0)?,
                size: row.get::<_, i64>(1)? as u64,
                modified: row.get(2)?,
                fingerprint: row.get::<_, i64>(3)? as u32,
                last_checked: row.get(4)?,
            })
        })?;

        let mut files = HashMap::new();
        for file in rows {
            let file = file?;
            files.insert(file.name.clone(), file);
        }

        Ok(Some(Directory::new(PathBuf::from(name), name.to_string(), files)))
    }

    /// Idempotent: no-op for an already-present directory; cascades to
    /// inserting its files, stamped with `last_checked`.
    pub fn insert_directory(
        &self,
        mirror_set: &str,
        dir: &Directory,
        last_checked: i64,
    ) -> Result<()> {
        self.insert_directory_row(mirror_set, &dir.name)?;
        for file in dir.files.values() {
            self.insert_file(mirror_set, &dir.name, file, last_checked)?;
        }
        Ok(())
    }

    /// Idempotent insert of the bare directory row.
    pub fn insert_directory_row(&self, mirror_set: &str, name: &str) -> Result<()> {
        self.connection().execute(
            "INSERT OR IGNORE INTO directory (mirror_set, name) VALUES (?1, ?2)",
            params![mirror_set, name],
        )?;
        Ok(())
    }

    // ── Files ────────────────────────────────────────────────────

    pub fn file_exists(&self, mirror_set: &str, dir_name: &str, file_name: &str) -> Result<bool> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM file f \
             JOIN directory d ON f.directory_id = d.id \
             WHERE d.mirror_set = ?1 AND d.name = ?2 AND f.name = ?3",
            params![mirror_set, dir_name, file_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Idempotent: no-op if the file row already exists. The containing
    /// directory row is created if missing.
    pub fn insert_file(
        &self,
        mirror_set: &str,
        dir_name: &str,
        file: &File,
        last_checked: i64,
    ) -> Result<()> {
        self.insert_directory_row(mirror_set, dir_name)?;
        self.connection().execute(
            "INSERT OR IGNORE INTO file \
             (directory_id, name, size, modified, fingerprint, last_checked) \
             SELECT id, ?3, ?4, ?5, ?6, ?7 FROM directory \
             WHERE mirror_set = ?1 AND name = ?2",
            params![
                mirror_set,
                dir_name,
                file.name,
                file.size as i64,
                file.modified,
                file.fingerprint as i64,
                last_checked,
            ],
        )?;
        Ok(())
    }

    /// Precondition, not an upsert: errors if the file row does not exist.
    pub fn update_file(
        &self,
        mirror_set: &str,
        dir_name: &str,
        file: &File,
        last_checked: i64,
    ) -> Result<()> {
        let updated = self.connection().execute(
            "UPDATE file SET size = ?4, modified = ?5, fingerprint = ?6, last_checked = ?7 \
             WHERE name = ?3 AND directory_id = \
               (SELECT id FROM directory WHERE mirror_set = ?1 AND name = ?2)",
            params![
                mirror_set,
                dir_name,
                file.name,
                file.size as i64,
                file.modified,
                file.fingerprint as i64,
                last_checked,
            ],
        )?;

        if updated == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        }
        Ok(())
    }

    /// Remove rows whose last_checked was not refreshed during the pass
    /// that started at `pass_started_at` (presumed deleted from all
    /// mirrors). Must run only after full-pass completion. Returns the
    /// number of file rows removed.
    pub fn prune(&self, mirror_set: &str, pass_started_at: i64) -> Result<usize> {
        let removed = self.connection().execute(
            "DELETE FROM file WHERE last_checked < ?2 AND directory_id IN \
               (SELECT id FROM directory WHERE mirror_set = ?1)",
            params![mirror_set, pass_started_at],
        )?;

        // Directory rows left with no files are stale too.
        self.connection().execute(
            "DELETE FROM directory WHERE mirror_set = ?1 AND id NOT IN \
               (SELECT DISTINCT directory_id FROM file)",
            params![mirror_set],
        )?;

        debug!("Pruned {} stale file rows for set '{}'", removed, mirror_set);
        Ok(removed)
    }

    // ── Divergences ──────────────────────────────────────────────

    /// Persist a divergence that needs manual reconciliation.
    pub fn record_divergence(&self, mirror_set: &str, kind: &str, detail: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.connection().execute(
            "INSERT INTO divergence (mirror_set, detected_at, kind, detail) \
             VALUES (?1, ?2, ?3, ?4)",
            params![mirror_set, now, kind, detail],
        )?;
        Ok(())
    }

    /// Mark a divergence as handled by the operator; errors if the id is
    /// unknown.
    pub fn resolve_divergence(&self, id: i64) -> Result<()> {
        let updated = self.connection().execute(
            "UPDATE divergence SET resolved = 1 WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Err(rusqlite::Error::QueryReturnedNoRows);
        }
        Ok(())
    }

    pub fn unresolved_divergences(&self, mirror_set: &str) -> Result<Vec<DivergenceRecord>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, mirror_set, detected_at, kind, detail, resolved \
             FROM divergence WHERE mirror_set = ?1 AND resolved = 0 \
             ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![mirror_set], |row| {
                Ok(DivergenceRecord {
                    id: row.get(0)?,
                    mirror_set: row.get(1)?,
                    detected_at: row.get(2)?,
                    kind: row.get(3)?,
                    detail: row.get(4)?,
                    resolved: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }
}
