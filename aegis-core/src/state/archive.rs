//! SQLite archive of scan snapshots
//!
//! The in-memory store is authoritative while a scan runs. The archive keeps
//! the last snapshot of every scan so status queries keep working after the
//! session was evicted or the process restarted.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::Result;
use crate::state::models::ScanSession;
use crate::state::run_migrations;

/// Snapshot archive backed by a single SQLite database
pub struct SessionArchive {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SessionArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionArchive").finish_non_exhaustive()
    }
}

impl SessionArchive {
    /// Open (or create) the archive at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        run_migrations(&conn)?;
        debug!(path = %path.display(), "opened session archive");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the snapshot of a session
    pub fn save(&self, session: &ScanSession) -> Result<()> {
        let snapshot = serde_json::to_string(session)?;
        self.conn().execute(
            "INSERT INTO scans (scan_id, target, mode, created_at, updated_at, finished, snapshot)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(scan_id) DO UPDATE SET
                updated_at = excluded.updated_at,
                finished = excluded.finished,
                snapshot = excluded.snapshot",
            params![
                session.scan_id,
                session.target,
                session.mode.as_str(),
                session.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                session.finished_at.is_some(),
                snapshot,
            ],
        )?;
        Ok(())
    }

    /// Load the last snapshot of a scan
    pub fn load(&self, scan_id: &str) -> Result<Option<ScanSession>> {
        let snapshot: Option<String> = self
            .conn()
            .query_row(
                "SELECT snapshot FROM scans WHERE scan_id = ?1",
                [scan_id],
                |row| row.get(0),
            )
            .optional()?;

        snapshot
            .map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }

    /// Most recently created scan
    pub fn latest(&self) -> Result<Option<ScanSession>> {
        let snapshot: Option<String> = self
            .conn()
            .query_row(
                "SELECT snapshot FROM scans ORDER BY created_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        snapshot
            .map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }

    /// Scan ids, newest first
    pub fn list(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT scan_id FROM scans ORDER BY created_at DESC LIMIT ?1")?;
        let ids = stmt
            .query_map([limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::state::models::{AgentName, RepoSource, ScanMode};
    use tempfile::TempDir;

    fn session(id: &str) -> ScanSession {
        let repo = RepoSource::new("https://github.com/acme/app");
        ScanSession::new(
            id,
            ScanMode::Fast,
            Some(&repo),
            None,
            &[AgentName::Static, AgentName::Report],
        )
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let archive = SessionArchive::open_in_memory().unwrap();
        let mut s = session("scan-a");
        s.logs.push("hello".into());
        archive.save(&s).unwrap();

        let loaded = archive.load("scan-a").unwrap().unwrap();
        assert_eq!(loaded.scan_id, "scan-a");
        assert_eq!(loaded.logs, vec!["hello".to_string()]);
        assert_eq!(loaded.agents(), vec![AgentName::Static, AgentName::Report]);

        assert!(archive.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_overwrites_snapshot() {
        let archive = SessionArchive::open_in_memory().unwrap();
        let mut s = session("scan-a");
        archive.save(&s).unwrap();

        s.finished_at = Some(Utc::now());
        s.logs.push("done".into());
        archive.save(&s).unwrap();

        let loaded = archive.load("scan-a").unwrap().unwrap();
        assert!(loaded.finished_at.is_some());
        assert_eq!(archive.list(10).unwrap(), vec!["scan-a".to_string()]);
    }

    #[test]
    fn test_latest_orders_by_creation() {
        let archive = SessionArchive::open_in_memory().unwrap();
        assert!(archive.latest().unwrap().is_none());

        let older = session("old");
        let mut newer = session("new");
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        archive.save(&newer).unwrap();
        archive.save(&older).unwrap();

        assert_eq!(archive.latest().unwrap().unwrap().scan_id, "new");
        assert_eq!(archive.list(1).unwrap(), vec!["new".to_string()]);
    }

    #[test]
    fn test_archive_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("scans.db");

        {
            let archive = SessionArchive::open(&path).unwrap();
            archive.save(&session("persisted")).unwrap();
        }

        let archive = SessionArchive::open(&path).unwrap();
        assert!(archive.load("persisted").unwrap().is_some());
    }
}
