//! Archive schema definitions

/// Current archive schema version, stored in `archive_meta`
pub const SCHEMA_VERSION: &str = "1";

/// SQL to create all tables
pub const SCHEMA: &str = r#"
-- One row per scan; `snapshot` holds the serialized ScanSession
CREATE TABLE IF NOT EXISTS scans (
    scan_id TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    mode TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    finished INTEGER NOT NULL DEFAULT 0,
    snapshot TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS archive_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scans_created ON scans(created_at);
CREATE INDEX IF NOT EXISTS idx_scans_finished ON scans(finished);
"#;
