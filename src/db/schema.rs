//! Schema bootstrap, FTS consistency, and reset (spec §4.5, §6).
//!
//! Grounded on `db/schema_sync.rs`'s raw-SQL-over-`SqlitePool` style (that
//! module already issues `PRAGMA table_info` and `CREATE TABLE` strings
//! against a `SqlitePool`) rather than the Postgres-era `sqlx::migrate!`
//! path the teacher uses elsewhere — §4.5/§6 describe a single-file SQLite
//! database this crate owns outright, not a server-managed schema.

use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::error::{LibrarianError, Result};

const SCHEMA_VERSION: i64 = 1;

const CREATE_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS schema_meta (
        version INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS media_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        size INTEGER NOT NULL,
        last_modified INTEGER NOT NULL,
        has_subtitle INTEGER NOT NULL DEFAULT 0,
        extension TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS subtitles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        media_id INTEGER NOT NULL REFERENCES media_files(id),
        start_ms INTEGER NOT NULL,
        end_ms INTEGER NOT NULL,
        content TEXT NOT NULL,
        lang TEXT NOT NULL DEFAULT 'unknown',
        source_path TEXT
    )"#,
    r#"CREATE VIRTUAL TABLE IF NOT EXISTS subtitles_fts USING fts5(
        content,
        content='subtitles',
        content_rowid='id'
    )"#,
    r#"CREATE TABLE IF NOT EXISTS bookmarks (
        media_path TEXT NOT NULL,
        start_ms INTEGER NOT NULL,
        bookmarked INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (media_path, start_ms)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS tags (
        media_path TEXT NOT NULL,
        start_ms INTEGER NOT NULL,
        tag TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (media_path, start_ms, tag)
    )"#,
];

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_media_files_path ON media_files(path)",
    "CREATE INDEX IF NOT EXISTS idx_subtitles_media_start ON subtitles(media_id, start_ms)",
    "CREATE INDEX IF NOT EXISTS idx_subtitles_start ON subtitles(start_ms)",
];

// FTS5 contentless-over-base-table triggers: the base `subtitles` table is
// the sole source of truth, so these three triggers are the *only* writers
// to `subtitles_fts` (spec §3's SubtitleFTS invariant, §9's "FTS maintenance
// by trigger" design note).
const CREATE_TRIGGERS: &[&str] = &[
    r#"CREATE TRIGGER IF NOT EXISTS subtitles_ai AFTER INSERT ON subtitles BEGIN
        INSERT INTO subtitles_fts(rowid, content) VALUES (new.id, new.content);
    END"#,
    r#"CREATE TRIGGER IF NOT EXISTS subtitles_ad AFTER DELETE ON subtitles BEGIN
        INSERT INTO subtitles_fts(subtitles_fts, rowid, content) VALUES('delete', old.id, old.content);
    END"#,
    r#"CREATE TRIGGER IF NOT EXISTS subtitles_au AFTER UPDATE ON subtitles BEGIN
        INSERT INTO subtitles_fts(subtitles_fts, rowid, content) VALUES('delete', old.id, old.content);
        INSERT INTO subtitles_fts(rowid, content) VALUES (new.id, new.content);
    END"#,
];

/// Open the pragmas spec §4.5 requires: WAL mode, `synchronous=NORMAL`,
/// `temp_store=MEMORY`, and the configured busy timeout.
pub async fn apply_pragmas(pool: &SqlitePool, busy_timeout_ms: u64) -> Result<()> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    sqlx::query("PRAGMA temp_store=MEMORY").execute(pool).await?;
    sqlx::query(&format!("PRAGMA busy_timeout={busy_timeout_ms}"))
        .execute(pool)
        .await?;
    Ok(())
}

/// Create base tables, indexes, the FTS5 index, and its maintenance
/// triggers if they don't already exist, then stamp `schema_meta` (spec
/// §4.5 "Schema bootstrap").
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for stmt in CREATE_TABLES {
        sqlx::query(stmt).execute(pool).await?;
    }
    for stmt in CREATE_INDEXES {
        sqlx::query(stmt).execute(pool).await?;
    }
    for stmt in CREATE_TRIGGERS {
        sqlx::query(stmt).execute(pool).await?;
    }

    let version: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_meta LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if version.is_none() {
        sqlx::query("INSERT INTO schema_meta (version) VALUES (?)")
            .bind(SCHEMA_VERSION)
            .execute(pool)
            .await?;
        info!(version = SCHEMA_VERSION, "bootstrapped schema");
    }

    Ok(())
}

/// Compare `count(subtitles)` to `count(subtitles_fts)`; if unequal, rebuild
/// the FTS index (spec §4.5 "FTS consistency check"). Run on startup and
/// after any direct-repair path.
pub async fn ensure_fts_consistent(pool: &SqlitePool) -> Result<()> {
    let subtitle_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subtitles")
        .fetch_one(pool)
        .await?;
    let fts_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subtitles_fts")
        .fetch_one(pool)
        .await?;

    if subtitle_count == fts_count {
        return Ok(());
    }

    warn!(
        subtitle_count,
        fts_count, "FTS index out of sync with base table; rebuilding"
    );
    rebuild_fts(pool).await
}

async fn rebuild_fts(pool: &SqlitePool) -> Result<()> {
    sqlx::query("INSERT INTO subtitles_fts(subtitles_fts) VALUES('rebuild')")
        .execute(pool)
        .await
        .map_err(|e| LibrarianError::FtsCorruption(format!("rebuild failed: {e}")))?;

    let subtitle_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subtitles")
        .fetch_one(pool)
        .await?;
    let fts_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subtitles_fts")
        .fetch_one(pool)
        .await?;
    if subtitle_count != fts_count {
        return Err(LibrarianError::FtsCorruption(format!(
            "rebuild left counts mismatched: subtitles={subtitle_count} fts={fts_count}"
        )));
    }
    Ok(())
}

/// List base tables (diagnostic/CLI surface, spec §4.5).
pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
}

/// Truncate all tables, reseed the schema, and rebuild the FTS index. Must
/// succeed even if FTS is corrupt (spec §4.5 "Reset").
///
/// The triggers in `CREATE_TRIGGERS` fire on every write to `subtitles` and
/// write into `subtitles_fts` themselves; against a corrupted shadow table
/// that write can fail and would abort the whole reset. So the triggers and
/// the FTS table are dropped first — deleting the base tables is then plain
/// relational DML with no FTS5 bookkeeping involved — and `init_schema`
/// recreates everything (`CREATE ... IF NOT EXISTS`) fresh and empty.
pub async fn reset_all(pool: &SqlitePool) -> Result<()> {
    for trigger in ["subtitles_ai", "subtitles_ad", "subtitles_au"] {
        sqlx::query(&format!("DROP TRIGGER IF EXISTS {trigger}"))
            .execute(pool)
            .await?;
    }
    sqlx::query("DROP TABLE IF EXISTS subtitles_fts")
        .execute(pool)
        .await?;

    for table in ["subtitles", "media_files", "bookmarks", "tags"] {
        sqlx::query(&format!("DELETE FROM {table}")).execute(pool).await?;
    }

    init_schema(pool).await?;
    Ok(())
}
