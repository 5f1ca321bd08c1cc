use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::Path;
use tracing::debug;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Applies the block schema; safe to run against an existing database.
pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    debug!(path = %path.display(), "block database ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn schema_is_idempotent_and_creates_blocks_table() {
        let dir = std::env::temp_dir()
            .join(format!("dayplanner-storage-tests-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("schema.sqlite");

        initialize_database(&path).expect("first init");
        initialize_database(&path).expect("second init");

        let connection = Connection::open(&path).expect("open database");
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'blocks'",
                [],
                |row| row.get(0),
            )
            .expect("query sqlite_master");
        assert_eq!(tables, 1);

        let _ = fs::remove_dir_all(&dir);
    }
}
