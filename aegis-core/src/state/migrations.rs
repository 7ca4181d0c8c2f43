//! Archive schema setup and version check

use rusqlite::{Connection, OptionalExtension};

use super::schema::{SCHEMA, SCHEMA_VERSION};
use crate::{Error, Result};

/// Create missing tables and record the schema version.
///
/// Fails when the file was written by a newer schema, so an old binary
/// never rewrites snapshots it cannot read back.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM archive_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        None => {
            conn.execute(
                "INSERT INTO archive_meta (key, value) VALUES ('schema_version', ?1)",
                [SCHEMA_VERSION],
            )?;
        }
        Some(version) if is_newer(&version) => {
            return Err(Error::Config(format!(
                "archive schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }
        Some(_) => {}
    }
    Ok(())
}

fn is_newer(stored: &str) -> bool {
    match (stored.parse::<u32>(), SCHEMA_VERSION.parse::<u32>()) {
        (Ok(stored), Ok(current)) => stored > current,
        _ => true,
    }
}
