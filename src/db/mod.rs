//! Repository (spec §4.5, component C5): the sole owner of the `SqlitePool`
//! and every SQL statement in the crate. Every other component talks to the
//! database exclusively through this type.

pub mod annotations;
pub mod media;
pub mod schema;
pub mod subtitles;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::Result;
use crate::subtitle::Cue;

pub use annotations::{CueAnnotations, add_tag, annotations_for_cues, list_tags, remove_tag, toggle_bookmark};
pub use media::{MediaFileRecord, count_subtitles_for_media, find_media_by_path, refresh_has_subtitle, upsert_media};
pub use subtitles::{SearchFilters, SortOrder, SubtitleHitRow, bulk_insert_subtitles, search_fts, search_like};

const MAX_BUSY_RETRIES: u32 = 3;

/// Owns the database connection pool and re-exposes the public contract
/// spec §4.5 names: `init_schema`, `ensure_fts_consistent`, `upsert_media`,
/// `find_media_by_path`, `bulk_insert_subtitles`, `count_subtitles_for_media`,
/// `search_like`, `search_fts`, `list_tables`, `reset_all`, `toggle_bookmark`,
/// `add_tag`, `remove_tag`, `list_tags`.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Open (creating if absent) the SQLite file at `db_path` and apply the
    /// pragmas spec §4.5 requires.
    pub async fn open(db_path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(busy_timeout_ms));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        schema::apply_pragmas(&pool, busy_timeout_ms).await?;
        Ok(Self { pool })
    }

    /// Wrap an already-open pool (used by tests against `sqlite::memory:`).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        schema::init_schema(&self.pool).await
    }

    pub async fn ensure_fts_consistent(&self) -> Result<()> {
        schema::ensure_fts_consistent(&self.pool).await
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        schema::list_tables(&self.pool).await
    }

    pub async fn reset_all(&self) -> Result<()> {
        schema::reset_all(&self.pool).await
    }

    pub async fn upsert_media(&self, path: &str, size: i64, last_modified: i64, extension: &str) -> Result<i64> {
        retry_on_busy(|| media::upsert_media(&self.pool, path, size, last_modified, extension)).await
    }

    pub async fn find_media_by_path(&self, path: &str) -> Result<Option<MediaFileRecord>> {
        media::find_media_by_path(&self.pool, path).await
    }

    pub async fn count_subtitles_for_media(&self, media_id: i64) -> Result<i64> {
        media::count_subtitles_for_media(&self.pool, media_id).await
    }

    pub async fn bulk_insert_subtitles(
        &self,
        media_id: i64,
        source_path: Option<&str>,
        cues: &[Cue],
        lang: &str,
    ) -> Result<u64> {
        retry_on_busy(|| subtitles::bulk_insert_subtitles(&self.pool, media_id, source_path, cues, lang)).await
    }

    pub async fn search_like(&self, query: &str, filters: &SearchFilters) -> Result<(i64, Vec<SubtitleHitRow>)> {
        subtitles::search_like(&self.pool, query, filters).await
    }

    pub async fn search_fts(&self, query: &str, filters: &SearchFilters) -> Result<(i64, Vec<SubtitleHitRow>)> {
        subtitles::search_fts(&self.pool, query, filters).await
    }

    pub async fn toggle_bookmark(&self, media_path: &str, start_ms: i64, bookmarked: bool) -> Result<()> {
        annotations::toggle_bookmark(&self.pool, media_path, start_ms, bookmarked).await
    }

    pub async fn add_tag(&self, media_path: &str, start_ms: i64, tag: &str) -> Result<()> {
        annotations::add_tag(&self.pool, media_path, start_ms, tag).await
    }

    pub async fn remove_tag(&self, media_path: &str, start_ms: i64, tag: &str) -> Result<()> {
        annotations::remove_tag(&self.pool, media_path, start_ms, tag).await
    }

    pub async fn list_tags(&self, media_path: &str, start_ms: i64) -> Result<Vec<String>> {
        annotations::list_tags(&self.pool, media_path, start_ms).await
    }

    pub async fn annotations_for_cues(&self, keys: &[(String, i64)]) -> Result<std::collections::HashMap<(String, i64), CueAnnotations>> {
        annotations::annotations_for_cues(&self.pool, keys).await
    }
}

/// Retry a write once or twice on `SQLITE_BUSY`/`SQLITE_LOCKED`, with a short
/// backoff, before surfacing the error (spec §4.5 "Connection discipline":
/// single writer, `busy_timeout` set, retry with backoff up to 3 attempts).
async fn retry_on_busy<F, Fut, T>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = None;
    for try_num in 0..MAX_BUSY_RETRIES {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(crate::error::LibrarianError::Db(e)) if is_busy(&e) => {
                warn!(attempt = try_num + 1, "database busy, retrying");
                tokio::time::sleep(Duration::from_millis(20 * (try_num as u64 + 1))).await;
                last_err = Some(crate::error::LibrarianError::Db(e));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("loop always sets last_err before exhausting retries"))
}

fn is_busy(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().map(|c| c == "5" || c == "6").unwrap_or(false)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_repo() -> Repository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = Repository::from_pool(pool);
        repo.init_schema().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn repository_round_trips_through_the_public_contract() {
        let repo = memory_repo().await;
        let media_id = repo.upsert_media("/a.mp4", 1, 1, "mp4").await.unwrap();
        let cues = vec![Cue {
            start_ms: 0,
            end_ms: 1000,
            content: "hello world".into(),
        }];
        let inserted = repo.bulk_insert_subtitles(media_id, None, &cues, "en").await.unwrap();
        assert_eq!(inserted, 1);

        let found = repo.find_media_by_path("/a.mp4").await.unwrap().unwrap();
        assert!(found.has_subtitle);

        let (total, hits) = repo
            .search_like("hello", &SearchFilters { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits[0].media_path, "/a.mp4");
    }

    #[tokio::test]
    async fn reset_all_clears_media_and_subtitles() {
        let repo = memory_repo().await;
        let media_id = repo.upsert_media("/a.mp4", 1, 1, "mp4").await.unwrap();
        repo.bulk_insert_subtitles(
            media_id,
            None,
            &[Cue { start_ms: 0, end_ms: 1000, content: "hi".into() }],
            "en",
        )
        .await
        .unwrap();

        repo.reset_all().await.unwrap();
        assert!(repo.find_media_by_path("/a.mp4").await.unwrap().is_none());
    }
}
