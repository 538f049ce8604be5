//! Bookmark/Tag Store (spec §4.9, component C9).
//!
//! Bookmarks and tags are keyed by `(media_path, start_ms)` rather than by
//! subtitle row id, so they survive a re-index that drops and reinserts
//! cues (spec §3: "Annotations key on `(media_path, start_ms)`, not on
//! `Subtitle.id`, so re-indexing a track does not orphan them").

use sqlx::SqlitePool;

use crate::error::Result;

/// Set the bookmark at `(media_path, start_ms)` to `bookmarked` (spec §6
/// control interface: `toggle_bookmark | media_path, start_ms, bool`).
/// Idempotent: setting an already-set value is a no-op (spec §4.9, §8 S7).
pub async fn toggle_bookmark(
    pool: &SqlitePool,
    media_path: &str,
    start_ms: i64,
    bookmarked: bool,
) -> Result<()> {
    let existing: Option<bool> = sqlx::query_scalar(
        "SELECT bookmarked FROM bookmarks WHERE media_path = ? AND start_ms = ?",
    )
    .bind(media_path)
    .bind(start_ms)
    .fetch_optional(pool)
    .await?;

    if existing == Some(bookmarked) {
        return Ok(());
    }

    if bookmarked {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            r#"INSERT INTO bookmarks (media_path, start_ms, bookmarked, created_at) VALUES (?, ?, 1, ?)
               ON CONFLICT(media_path, start_ms) DO UPDATE SET bookmarked = 1"#,
        )
        .bind(media_path)
        .bind(start_ms)
        .bind(now)
        .execute(pool)
        .await?;
    } else {
        sqlx::query("DELETE FROM bookmarks WHERE media_path = ? AND start_ms = ?")
            .bind(media_path)
            .bind(start_ms)
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Idempotent: adding a tag that already exists is a no-op.
pub async fn add_tag(pool: &SqlitePool, media_path: &str, start_ms: i64, tag: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    sqlx::query(
        "INSERT OR IGNORE INTO tags (media_path, start_ms, tag, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(media_path)
    .bind(start_ms)
    .bind(tag)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Idempotent: removing a tag that doesn't exist is a no-op.
pub async fn remove_tag(pool: &SqlitePool, media_path: &str, start_ms: i64, tag: &str) -> Result<()> {
    sqlx::query("DELETE FROM tags WHERE media_path = ? AND start_ms = ? AND tag = ?")
        .bind(media_path)
        .bind(start_ms)
        .bind(tag)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_tags(pool: &SqlitePool, media_path: &str, start_ms: i64) -> Result<Vec<String>> {
    let tags: Vec<String> = sqlx::query_scalar(
        "SELECT tag FROM tags WHERE media_path = ? AND start_ms = ? ORDER BY tag",
    )
    .bind(media_path)
    .bind(start_ms)
    .fetch_all(pool)
    .await?;
    Ok(tags)
}

/// Annotation state for one cue, as attached to a `SubtitleHit` (spec §4.8).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueAnnotations {
    pub is_bookmarked: bool,
    pub tags: Vec<String>,
}

/// Batched lookup for a page of search results, so C8 never does one query
/// per hit (spec §4.8 "no N+1 bookmark/tag lookups per results page").
pub async fn annotations_for_cues(
    pool: &SqlitePool,
    keys: &[(String, i64)],
) -> Result<std::collections::HashMap<(String, i64), CueAnnotations>> {
    use std::collections::HashMap;

    let mut out: HashMap<(String, i64), CueAnnotations> = HashMap::new();
    if keys.is_empty() {
        return Ok(out);
    }

    let mut bookmark_qb: sqlx::QueryBuilder<sqlx::Sqlite> =
        sqlx::QueryBuilder::new("SELECT media_path, start_ms FROM bookmarks WHERE ");
    push_key_match(&mut bookmark_qb, keys);
    let bookmarked: Vec<(String, i64)> = bookmark_qb
        .build_query_as()
        .fetch_all(pool)
        .await?;
    for key in bookmarked {
        out.entry(key).or_default().is_bookmarked = true;
    }

    let mut tag_qb: sqlx::QueryBuilder<sqlx::Sqlite> =
        sqlx::QueryBuilder::new("SELECT media_path, start_ms, tag FROM tags WHERE ");
    push_key_match(&mut tag_qb, keys);
    tag_qb.push(" ORDER BY media_path, start_ms, tag");
    let tag_rows: Vec<(String, i64, String)> = tag_qb.build_query_as().fetch_all(pool).await?;
    for (path, start_ms, tag) in tag_rows {
        out.entry((path, start_ms)).or_default().tags.push(tag);
    }

    Ok(out)
}

fn push_key_match(qb: &mut sqlx::QueryBuilder<sqlx::Sqlite>, keys: &[(String, i64)]) {
    qb.push("(");
    let mut separated = qb.separated(" OR ");
    for (path, start_ms) in keys {
        separated.push("(media_path = ");
        separated.push_bind_unseparated(path.clone());
        separated.push_unseparated(" AND start_ms = ");
        separated.push_bind_unseparated(*start_ms);
        separated.push_unseparated(")");
    }
    qb.push(")");
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
    async fn toggle_bookmark_sets_explicit_state() {
        let pool = memory_pool().await;
        toggle_bookmark(&pool, "/a.mp4", 1000, true).await.unwrap();
        toggle_bookmark(&pool, "/a.mp4", 1000, true).await.unwrap();
        let bookmarked: bool =
            sqlx::query_scalar("SELECT bookmarked FROM bookmarks WHERE media_path = '/a.mp4' AND start_ms = 1000")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(bookmarked);

        toggle_bookmark(&pool, "/a.mp4", 1000, false).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookmarks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn toggling_twice_to_true_leaves_exactly_one_row() {
        // spec §8 S7: toggle bookmark twice to true, expect one row, bookmarked=true.
        let pool = memory_pool().await;
        toggle_bookmark(&pool, "/a.mp4", 1000, true).await.unwrap();
        toggle_bookmark(&pool, "/a.mp4", 1000, true).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookmarks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn add_tag_is_idempotent() {
        use pretty_assertions::assert_eq;

        let pool = memory_pool().await;
        add_tag(&pool, "/a.mp4", 1000, "favorite").await.unwrap();
        add_tag(&pool, "/a.mp4", 1000, "favorite").await.unwrap();
        let tags = list_tags(&pool, "/a.mp4", 1000).await.unwrap();
        assert_eq!(tags, vec!["favorite".to_string()]);
    }

    #[tokio::test]
    async fn remove_tag_missing_is_noop() {
        let pool = memory_pool().await;
        remove_tag(&pool, "/a.mp4", 1000, "nope").await.unwrap();
        assert!(list_tags(&pool, "/a.mp4", 1000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batched_lookup_covers_multiple_keys() {
        let pool = memory_pool().await;
        toggle_bookmark(&pool, "/a.mp4", 1000, true).await.unwrap();
        add_tag(&pool, "/a.mp4", 1000, "intro").await.unwrap();
        add_tag(&pool, "/b.mp4", 2000, "climax").await.unwrap();

        let keys = vec![
            ("/a.mp4".to_string(), 1000i64),
            ("/b.mp4".to_string(), 2000i64),
            ("/c.mp4".to_string(), 3000i64),
        ];
        let result = annotations_for_cues(&pool, &keys).await.unwrap();

        assert!(result[&("/a.mp4".to_string(), 1000)].is_bookmarked);
        assert_eq!(result[&("/a.mp4".to_string(), 1000)].tags, vec!["intro"]);
        assert!(!result.get(&("/b.mp4".to_string(), 2000)).unwrap().is_bookmarked);
        assert_eq!(result[&("/b.mp4".to_string(), 2000)].tags, vec!["climax"]);
        assert!(!result.contains_key(&("/c.mp4".to_string(), 3000)));
    }
}
