//! Subtitle cue rows: bulk insert, substring search, and FTS search
//! (spec §4.5 `bulk_insert_subtitles`/`search_like`/`search_fts`).

use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::error::{LibrarianError, Result};
use crate::subtitle::Cue;

use super::media::refresh_has_subtitle;

/// Which way to order a result page (spec §4.5 "Order by one of …").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// For LIKE: inverse length of content. For FTS: the engine's bm25 rank.
    Relevance,
    /// By parent media's `last_modified`, descending.
    Recent,
    /// By parent media's `last_modified`, ascending.
    Oldest,
}

/// Filters shared by `search_like` and `search_fts` (spec §4.5, §4.8).
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub media_extensions: Option<Vec<String>>,
    pub min_start_ms: Option<i64>,
    pub max_start_ms: Option<i64>,
    pub lang: Option<String>,
    pub media_only: bool,
    pub sort: Option<SortOrder>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Relevance
    }
}

/// One row returned by a search query, before C8 enriches it with
/// bookmark/tag state.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleHitRow {
    pub media_path: String,
    pub extension: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub content: String,
    pub lang: String,
}

/// Insert all cues for one track in a single transaction; if any row fails,
/// roll back the entire track (spec §4.5 "Bulk insert", §8 property 3).
/// Returns the number of rows actually inserted.
pub async fn bulk_insert_subtitles(
    pool: &SqlitePool,
    media_id: i64,
    source_path: Option<&str>,
    cues: &[Cue],
    lang: &str,
) -> Result<u64> {
    if cues.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for cue in cues {
        sqlx::query(
            "INSERT INTO subtitles (media_id, start_ms, end_ms, content, lang, source_path) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(media_id)
        .bind(cue.start_ms)
        .bind(cue.end_ms)
        .bind(&cue.content)
        .bind(lang)
        .bind(source_path)
        .execute(&mut *tx)
        .await?;
        inserted += 1;
    }

    tx.commit().await?;
    refresh_has_subtitle(pool, media_id).await?;

    Ok(inserted)
}

/// Case-insensitive `LIKE %q%` substring search with SQL metacharacters
/// escaped, so a literal `%`/`_` in the query matches literally (spec §4.5
/// "Substring search", §8 property 10).
pub async fn search_like(
    pool: &SqlitePool,
    query: &str,
    filters: &SearchFilters,
) -> Result<(i64, Vec<SubtitleHitRow>)> {
    let escaped = escape_like(query);
    let pattern = format!("%{escaped}%");

    if filters.media_only {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT s.start_ms, s.end_ms, s.content, s.lang, m.path, m.extension, LENGTH(s.content) AS content_len \
             FROM subtitles s JOIN media_files m ON m.id = s.media_id WHERE s.content LIKE ",
        );
        qb.push_bind(pattern);
        qb.push(" ESCAPE '\\' ");
        push_filters(&mut qb, filters);
        push_order_by(&mut qb, filters.sort.unwrap_or_default(), true);
        let rows = qb.build().fetch_all(pool).await?;
        return Ok(paginate_existing(rows, filters));
    }

    let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT COUNT(*) FROM subtitles s JOIN media_files m ON m.id = s.media_id WHERE s.content LIKE ",
    );
    count_qb.push_bind(pattern.clone());
    count_qb.push(" ESCAPE '\\' ");
    push_filters(&mut count_qb, filters);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT s.start_ms, s.end_ms, s.content, s.lang, m.path, m.extension, LENGTH(s.content) AS content_len \
         FROM subtitles s JOIN media_files m ON m.id = s.media_id WHERE s.content LIKE ",
    );
    qb.push_bind(pattern);
    qb.push(" ESCAPE '\\' ");
    push_filters(&mut qb, filters);
    push_order_by(&mut qb, filters.sort.unwrap_or_default(), true);
    qb.push(" LIMIT ").push_bind(filters.limit).push(" OFFSET ").push_bind(filters.offset);

    let rows = qb.build().fetch_all(pool).await?;
    let hits = rows.into_iter().map(row_to_hit).collect();

    Ok((total, hits))
}

/// Apply the `media_only` filter (spec §4.5: "filter to cues whose parent
/// media still has an existing file") and the requested page window over an
/// unpaginated result set. File existence can't be expressed in SQL, so
/// `media_only` queries fetch every matching row, filter in process, and
/// paginate afterward — `total` reflects the post-filter count, matching
/// what the caller will see across all pages (spec §8 property 9).
fn paginate_existing(rows: Vec<sqlx::sqlite::SqliteRow>, filters: &SearchFilters) -> (i64, Vec<SubtitleHitRow>) {
    let hits: Vec<SubtitleHitRow> = rows
        .into_iter()
        .map(row_to_hit)
        .filter(|hit| std::path::Path::new(&hit.media_path).is_file())
        .collect();
    let total = hits.len() as i64;

    let offset = filters.offset.max(0) as usize;
    let limit = filters.limit.max(0) as usize;
    let page = hits.into_iter().skip(offset).take(limit).collect();
    (total, page)
}

/// FTS5 phrase/boolean search (spec §4.5 "FTS search"). Passes the query
/// verbatim to the FTS `MATCH` operator, quoting any user-supplied double
/// quotes so they can't break out of the match expression. Surfaces a
/// [`LibrarianError::Query`] on malformed FTS syntax so the caller (C8) can
/// fall back to `search_like`.
pub async fn search_fts(
    pool: &SqlitePool,
    query: &str,
    filters: &SearchFilters,
) -> Result<(i64, Vec<SubtitleHitRow>)> {
    let quoted = quote_fts_query(query);

    if filters.media_only {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT s.start_ms, s.end_ms, s.content, s.lang, m.path, m.extension, bm25(subtitles_fts) AS rank \
             FROM subtitles_fts f JOIN subtitles s ON s.id = f.rowid \
             JOIN media_files m ON m.id = s.media_id WHERE subtitles_fts MATCH ",
        );
        qb.push_bind(quoted);
        push_filters(&mut qb, filters);
        push_order_by(&mut qb, filters.sort.unwrap_or_default(), false);
        let rows = qb
            .build()
            .fetch_all(pool)
            .await
            .map_err(|e| LibrarianError::Query(format!("invalid FTS query: {e}")))?;
        return Ok(paginate_existing(rows, filters));
    }

    let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT COUNT(*) FROM subtitles_fts f JOIN subtitles s ON s.id = f.rowid \
         JOIN media_files m ON m.id = s.media_id WHERE subtitles_fts MATCH ",
    );
    count_qb.push_bind(quoted.clone());
    push_filters(&mut count_qb, filters);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .map_err(|e| LibrarianError::Query(format!("invalid FTS query: {e}")))?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT s.start_ms, s.end_ms, s.content, s.lang, m.path, m.extension, bm25(subtitles_fts) AS rank \
         FROM subtitles_fts f JOIN subtitles s ON s.id = f.rowid \
         JOIN media_files m ON m.id = s.media_id WHERE subtitles_fts MATCH ",
    );
    qb.push_bind(quoted);
    push_filters(&mut qb, filters);
    push_order_by(&mut qb, filters.sort.unwrap_or_default(), false);
    qb.push(" LIMIT ").push_bind(filters.limit).push(" OFFSET ").push_bind(filters.offset);

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .map_err(|e| LibrarianError::Query(format!("invalid FTS query: {e}")))?;
    let hits = rows.into_iter().map(row_to_hit).collect();

    Ok((total, hits))
}

fn push_filters(qb: &mut QueryBuilder<Sqlite>, filters: &SearchFilters) {
    if let Some(exts) = &filters.media_extensions {
        if !exts.is_empty() {
            qb.push(" AND m.extension IN (");
            let mut separated = qb.separated(", ");
            for ext in exts {
                separated.push_bind(ext.clone());
            }
            separated.push_unseparated(")");
        }
    }
    if let Some(min_start) = filters.min_start_ms {
        qb.push(" AND s.start_ms >= ").push_bind(min_start);
    }
    if let Some(max_start) = filters.max_start_ms {
        qb.push(" AND s.start_ms <= ").push_bind(max_start);
    }
    if let Some(lang) = &filters.lang {
        qb.push(" AND s.lang = ").push_bind(lang.clone());
    }
    // media_only's actual file-existence check can't be expressed in SQL;
    // it's applied in `paginate_existing` once rows are in hand.
}

fn push_order_by(qb: &mut QueryBuilder<Sqlite>, sort: SortOrder, is_like: bool) {
    match sort {
        SortOrder::Relevance if is_like => {
            qb.push(" ORDER BY content_len ASC, m.path ASC, s.start_ms ASC");
        }
        SortOrder::Relevance => {
            qb.push(" ORDER BY rank ASC, m.path ASC, s.start_ms ASC");
        }
        SortOrder::Recent => {
            qb.push(" ORDER BY m.last_modified DESC, m.path ASC, s.start_ms ASC");
        }
        SortOrder::Oldest => {
            qb.push(" ORDER BY m.last_modified ASC, m.path ASC, s.start_ms ASC");
        }
    }
}

fn row_to_hit(row: sqlx::sqlite::SqliteRow) -> SubtitleHitRow {
    SubtitleHitRow {
        media_path: row.get("path"),
        extension: row.get("extension"),
        start_ms: row.get("start_ms"),
        end_ms: row.get("end_ms"),
        content: row.get("content"),
        lang: row.get("lang"),
    }
}

fn escape_like(query: &str) -> String {
    query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Quote bare user double-quotes so they can't break out of the FTS match
/// expression (spec §4.5 "quoting of user-supplied double quotes").
fn quote_fts_query(query: &str) -> String {
    query.replace('"', "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::media::upsert_media;
    use crate::db::schema::{apply_pragmas, init_schema};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_pragmas(&pool, 5000).await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    fn cue(start: i64, end: i64, content: &str) -> Cue {
        Cue {
            start_ms: start,
            end_ms: end,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn bulk_insert_round_trips_ordering() {
        let pool = seeded_pool().await;
        let media_id = upsert_media(&pool, "/a.mp4", 1, 1, "mp4").await.unwrap();
        let cues = vec![cue(1000, 2000, "one"), cue(3000, 4000, "two")];
        let inserted = bulk_insert_subtitles(&pool, media_id, None, &cues, "en").await.unwrap();
        assert_eq!(inserted, 2);

        let rows: Vec<i64> = sqlx::query_scalar("SELECT start_ms FROM subtitles WHERE media_id = ? ORDER BY id")
            .bind(media_id)
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows, vec![1000, 3000]);
    }

    #[tokio::test]
    async fn like_search_matches_case_insensitively() {
        let pool = seeded_pool().await;
        let media_id = upsert_media(&pool, "/a.mp4", 1, 1, "mp4").await.unwrap();
        bulk_insert_subtitles(&pool, media_id, None, &[cue(1000, 2500, "Hello world")], "en")
            .await
            .unwrap();

        let filters = SearchFilters {
            limit: 50,
            ..Default::default()
        };
        let (total, hits) = search_like(&pool, "hello", &filters).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].start_ms, 1000);
        assert_eq!(hits[0].content, "Hello world");
    }

    #[tokio::test]
    async fn like_search_escapes_metacharacters() {
        let pool = seeded_pool().await;
        let media_id = upsert_media(&pool, "/a.mp4", 1, 1, "mp4").await.unwrap();
        bulk_insert_subtitles(&pool, media_id, None, &[cue(0, 1000, "100% off"), cue(2000, 3000, "100X off")], "en")
            .await
            .unwrap();

        let filters = SearchFilters {
            limit: 50,
            ..Default::default()
        };
        let (total, _hits) = search_like(&pool, "100% off", &filters).await.unwrap();
        assert_eq!(total, 1, "% must match literally, not as a wildcard");
    }

    #[tokio::test]
    async fn fts_search_requires_all_terms() {
        let pool = seeded_pool().await;
        let media_id = upsert_media(&pool, "/a.mp4", 1, 1, "mp4").await.unwrap();
        bulk_insert_subtitles(
            &pool,
            media_id,
            None,
            &[cue(0, 1000, "hello world"), cue(2000, 3000, "hello there")],
            "en",
        )
        .await
        .unwrap();

        let filters = SearchFilters {
            limit: 50,
            ..Default::default()
        };
        let (total, hits) = search_fts(&pool, "hello AND world", &filters).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits[0].content, "hello world");
    }

    #[tokio::test]
    async fn media_only_excludes_hits_whose_file_no_longer_exists() {
        let pool = seeded_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.mp4");
        std::fs::write(&present, b"fake").unwrap();
        let missing = dir.path().join("missing.mp4");

        let present_id = upsert_media(&pool, present.to_str().unwrap(), 1, 1, "mp4").await.unwrap();
        let missing_id = upsert_media(&pool, missing.to_str().unwrap(), 1, 1, "mp4").await.unwrap();
        bulk_insert_subtitles(&pool, present_id, None, &[cue(0, 1000, "hello there")], "en").await.unwrap();
        bulk_insert_subtitles(&pool, missing_id, None, &[cue(0, 1000, "hello there")], "en").await.unwrap();

        let filters = SearchFilters {
            limit: 50,
            media_only: true,
            ..Default::default()
        };
        let (total, hits) = search_like(&pool, "hello", &filters).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(hits[0].media_path, present.to_str().unwrap());
    }

    #[tokio::test]
    async fn pagination_is_stable_across_pages() {
        let pool = seeded_pool().await;
        let media_id = upsert_media(&pool, "/a.mp4", 1, 1, "mp4").await.unwrap();
        let cues: Vec<Cue> = (0..5).map(|i| cue(i * 1000, i * 1000 + 500, "hello")).collect();
        bulk_insert_subtitles(&pool, media_id, None, &cues, "en").await.unwrap();

        let mut seen = Vec::new();
        for page in 0..3 {
            let filters = SearchFilters {
                limit: 2,
                offset: page * 2,
                ..Default::default()
            };
            let (_total, hits) = search_like(&pool, "hello", &filters).await.unwrap();
            seen.extend(hits.into_iter().map(|h| h.start_ms));
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1000, 2000, 3000, 4000]);
    }
}
