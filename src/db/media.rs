//! Media file rows (spec §3 "MediaFile", §4.5 `upsert_media`/`find_media_by_path`).

use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MediaFileRecord {
    pub id: i64,
    pub path: String,
    pub size: i64,
    pub last_modified: i64,
    pub has_subtitle: bool,
    pub extension: String,
}

/// Create a `media_files` row, or update `size`/`last_modified` if the path
/// already exists (spec §3: "Created when scanner first sees it; updated
/// when size or mtime change").
pub async fn upsert_media(
    pool: &SqlitePool,
    path: &str,
    size: i64,
    last_modified: i64,
    extension: &str,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO media_files (path, size, last_modified, has_subtitle, extension)
        VALUES (?, ?, ?, 0, ?)
        ON CONFLICT(path) DO UPDATE SET
            size = excluded.size,
            last_modified = excluded.last_modified,
            extension = excluded.extension
        RETURNING id
        "#,
    )
    .bind(path)
    .bind(size)
    .bind(last_modified)
    .bind(extension)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

pub async fn find_media_by_path(pool: &SqlitePool, path: &str) -> Result<Option<MediaFileRecord>> {
    let record = sqlx::query_as::<_, MediaFileRecord>(
        "SELECT id, path, size, last_modified, has_subtitle, extension FROM media_files WHERE path = ?",
    )
    .bind(path)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

pub async fn count_subtitles_for_media(pool: &SqlitePool, media_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subtitles WHERE media_id = ?")
        .bind(media_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Flip `has_subtitle` to reflect whether any cues exist for this media row
/// (spec §3's MediaFile invariant: "`has_subtitle` iff at least one
/// Subtitle row exists with matching `media_id`").
pub async fn refresh_has_subtitle(pool: &SqlitePool, media_id: i64) -> Result<()> {
    let count = count_subtitles_for_media(pool, media_id).await?;
    sqlx::query("UPDATE media_files SET has_subtitle = ? WHERE id = ?")
        .bind(count > 0)
        .bind(media_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{apply_pragmas, init_schema};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_pragmas(&pool, 5000).await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let pool = memory_pool().await;
        let id = upsert_media(&pool, "/a.mp4", 100, 1000, "mp4").await.unwrap();
        let found = find_media_by_path(&pool, "/a.mp4").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.size, 100);
        assert!(!found.has_subtitle);
    }

    #[tokio::test]
    async fn upsert_updates_size_and_mtime_on_conflict() {
        let pool = memory_pool().await;
        let id1 = upsert_media(&pool, "/a.mp4", 100, 1000, "mp4").await.unwrap();
        let id2 = upsert_media(&pool, "/a.mp4", 200, 2000, "mp4").await.unwrap();
        assert_eq!(id1, id2);
        let found = find_media_by_path(&pool, "/a.mp4").await.unwrap().unwrap();
        assert_eq!(found.size, 200);
        assert_eq!(found.last_modified, 2000);
    }

    #[tokio::test]
    async fn missing_path_returns_none() {
        let pool = memory_pool().await;
        assert!(find_media_by_path(&pool, "/nope.mp4").await.unwrap().is_none());
    }
}
