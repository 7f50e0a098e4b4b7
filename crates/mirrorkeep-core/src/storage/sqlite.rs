use rusqlite::{Connection, Result};
use tracing::debug;

pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = MetadataStore { conn };
        store.configure_pragmas()?;
        store.migrate_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = MetadataStore { conn };
        store.configure_pragmas()?;
        store.migrate_schema()?;
        Ok(store)
    }

    fn configure_pragmas(&self) -> Result<()> {
        // journal_mode reports the resulting mode as a row.
        self.conn
            .query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        self.conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        self.conn
            .busy_timeout(std::time::Duration::from_millis(5000))?;
        debug!("SQLite pragmas configured (WAL mode, 5s busy timeout)");
        Ok(())
    }

    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            debug!("Schema version {} < 1, dropping all tables and recreating", version);
            self.conn.execute_batch(
                "DROP TABLE IF EXISTS divergence;
                 DROP TABLE IF EXISTS file;
                 DROP TABLE IF EXISTS directory;",
            )?;
            self.conn.execute_batch("PRAGMA user_version = 1;")?;
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version 1)");
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Maintenance/test-only: wipe every table.
    pub fn drop_all(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM divergence;
             DELETE FROM file;
             DELETE FROM directory;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}
