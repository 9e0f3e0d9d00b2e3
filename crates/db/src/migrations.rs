/// Inline SQL migrations for the mediaferry database schema.
///
/// Simple inline migrations rather than sqlx migration files: the schema is
/// small and self-contained. Append only; never edit an applied entry.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: owners (managed elsewhere; read for display names and folders)
    r#"
CREATE TABLE IF NOT EXISTS users (
    id       INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    folder   TEXT NOT NULL DEFAULT '',
    is_admin INTEGER NOT NULL DEFAULT 0
);
"#,
    // Migration 2: download jobs
    r#"
CREATE TABLE IF NOT EXISTS download_jobs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id   INTEGER NOT NULL,
    target     TEXT NOT NULL,
    status     TEXT NOT NULL DEFAULT 'pending'
               CHECK (status IN ('pending', 'running', 'done', 'error', 'cancelled')),
    progress   REAL NOT NULL DEFAULT 0,
    error      TEXT,
    created_at TEXT NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_download_jobs_owner ON download_jobs(owner_id, created_at DESC);"#,
];
