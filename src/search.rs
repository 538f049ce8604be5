//! Search Service (spec §4.8, component C8).
//!
//! Wraps a [`Repository`], planning over the `like`/`fts` dual query modes,
//! shaping rows into [`SubtitleHit`]s, and attaching bookmark/tag state with
//! a single batched C9 lookup per page — never one query per hit.
//!
//! Grounded on `services/legacy/opensubtitles.rs`'s request/response record
//! shapes (`SubtitleSearchResult`/`SubtitleAttributes`) for the "dynamic API
//! becomes an explicit struct" move SPEC_FULL §9 calls for, and on
//! `indexer/definitions/newznab.rs`'s `urlencoding::encode` usage for the
//! `streaming_hint` derivation.

use tracing::warn;

use crate::db::{Repository, SearchFilters, SortOrder, SubtitleHitRow};
use crate::error::Result;

/// Which query engine to plan the search over (spec §4.8 `mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Like,
    Fts,
}

const MIN_PER_PAGE: u32 = 1;
const MAX_PER_PAGE: u32 = 200;
const DEFAULT_PER_PAGE: u32 = 50;

/// A caller-issued search (spec §4.8 `SearchRequest`).
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub lang: Option<String>,
    pub media_kind: Option<Vec<String>>,
    pub min_start_ms: Option<i64>,
    pub max_start_ms: Option<i64>,
    pub sort: SortOrder,
    pub page: u32,
    pub per_page: u32,
    pub media_only: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            mode: SearchMode::Like,
            lang: None,
            media_kind: None,
            min_start_ms: None,
            max_start_ms: None,
            sort: SortOrder::Relevance,
            page: 0,
            per_page: DEFAULT_PER_PAGE,
            media_only: false,
        }
    }
}

impl SearchRequest {
    /// Clamp `per_page` into `[1, 200]` per spec §4.8.
    fn clamped_per_page(&self) -> u32 {
        self.per_page.clamp(MIN_PER_PAGE, MAX_PER_PAGE)
    }
}

/// One search hit, annotated with bookmark/tag state (spec §4.8 `SubtitleHit`).
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleHit {
    pub media_path: String,
    pub media_kind: String,
    pub streaming_hint: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub content: String,
    pub lang: String,
    pub is_bookmarked: bool,
    pub tags: Vec<String>,
}

/// Result of running a [`SearchRequest`] (spec §4.8 `SearchResponse`).
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub total: i64,
    pub results: Vec<SubtitleHit>,
    /// Non-fatal warning, e.g. "FTS query invalid, fell back to LIKE mode."
    pub warning: Option<String>,
}

pub struct SearchService<'a> {
    repo: &'a Repository,
}

impl<'a> SearchService<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    /// Plan and execute one search request (spec §4.8's contracts).
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if request.query.trim().is_empty() {
            return Ok(SearchResponse::default());
        }

        let per_page = request.clamped_per_page();
        let filters = SearchFilters {
            media_extensions: request.media_kind.clone(),
            min_start_ms: request.min_start_ms,
            max_start_ms: request.max_start_ms,
            lang: request.lang.clone(),
            media_only: request.media_only,
            sort: Some(request.sort),
            limit: per_page as i64,
            offset: (request.page as i64) * per_page as i64,
        };

        let (total, rows, warning) = match request.mode {
            SearchMode::Like => {
                let (total, rows) = self.repo.search_like(&request.query, &filters).await?;
                (total, rows, None)
            }
            SearchMode::Fts => match self.repo.search_fts(&request.query, &filters).await {
                Ok((total, rows)) => (total, rows, None),
                Err(crate::error::LibrarianError::Query(detail)) => {
                    warn!(query = %request.query, error = %detail, "FTS query invalid, falling back to LIKE");
                    let (total, rows) = self.repo.search_like(&request.query, &filters).await?;
                    (total, rows, Some(format!("FTS query invalid ({detail}); fell back to LIKE mode")))
                }
                Err(e) => return Err(e),
            },
        };

        let results = self.attach_annotations(rows).await?;
        Ok(SearchResponse { total, results, warning })
    }

    /// Batched C9 lookup over the whole page's `(media_path, start_ms)` keys
    /// — exactly one query per annotation kind, never N+1 (spec §4.8).
    async fn attach_annotations(&self, rows: Vec<SubtitleHitRow>) -> Result<Vec<SubtitleHit>> {
        let keys: Vec<(String, i64)> = rows.iter().map(|r| (r.media_path.clone(), r.start_ms)).collect();
        let annotations = self.repo.annotations_for_cues(&keys).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let key = (row.media_path.clone(), row.start_ms);
                let annotation = annotations.get(&key).cloned().unwrap_or_default();
                SubtitleHit {
                    streaming_hint: streaming_hint(&row.media_path),
                    media_path: row.media_path,
                    media_kind: row.extension,
                    start_ms: row.start_ms,
                    end_ms: row.end_ms,
                    content: row.content,
                    lang: row.lang,
                    is_bookmarked: annotation.is_bookmarked,
                    tags: annotation.tags,
                }
            })
            .collect())
    }
}

/// A transport-neutral key derived from `media_path` via URL-safe encoding;
/// the HTTP layer (out of scope here) composes the absolute URL from it
/// (spec §4.8 "streaming_hint", glossary).
fn streaming_hint(media_path: &str) -> String {
    urlencoding::encode(media_path).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Repository;
    use crate::subtitle::Cue;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn seeded_repo() -> Repository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = Repository::from_pool(pool);
        repo.init_schema().await.unwrap();
        repo
    }

    fn cue(start: i64, end: i64, content: &str) -> Cue {
        Cue { start_ms: start, end_ms: end, content: content.to_string() }
    }

    #[tokio::test]
    async fn empty_query_returns_zero_with_no_hits() {
        let repo = seeded_repo().await;
        let service = SearchService::new(&repo);
        let response = service.search(&SearchRequest::default()).await.unwrap();
        assert_eq!(response.total, 0);
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn s1_single_hello_world_cue_is_found_by_like() {
        let repo = seeded_repo().await;
        let media_id = repo.upsert_media("/root/A.mp4", 1, 1, "mp4").await.unwrap();
        repo.bulk_insert_subtitles(media_id, None, &[cue(1000, 2500, "Hello world")], "en")
            .await
            .unwrap();

        let service = SearchService::new(&repo);
        let request = SearchRequest {
            query: "hello".to_string(),
            mode: SearchMode::Like,
            ..Default::default()
        };
        let response = service.search(&request).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.results.len(), 1);
        let hit = &response.results[0];
        assert_eq!(hit.start_ms, 1000);
        assert_eq!(hit.end_ms, 2500);
        assert_eq!(hit.content, "Hello world");
        assert_eq!(hit.media_path, "/root/A.mp4");
    }

    #[tokio::test]
    async fn fts_falls_back_to_like_on_malformed_query() {
        let repo = seeded_repo().await;
        let media_id = repo.upsert_media("/a.mp4", 1, 1, "mp4").await.unwrap();
        repo.bulk_insert_subtitles(media_id, None, &[cue(0, 1000, "hello world")], "en")
            .await
            .unwrap();

        let service = SearchService::new(&repo);
        // A dangling AND with nothing after it is invalid FTS5 syntax.
        let request = SearchRequest {
            query: "hello AND".to_string(),
            mode: SearchMode::Fts,
            ..Default::default()
        };
        let response = service.search(&request).await.unwrap();
        assert!(response.warning.is_some());
    }

    #[tokio::test]
    async fn annotations_are_attached_without_n_plus_one() {
        let repo = seeded_repo().await;
        let media_id = repo.upsert_media("/a.mp4", 1, 1, "mp4").await.unwrap();
        repo.bulk_insert_subtitles(media_id, None, &[cue(0, 1000, "hello there")], "en")
            .await
            .unwrap();
        repo.toggle_bookmark("/a.mp4", 0, true).await.unwrap();
        repo.add_tag("/a.mp4", 0, "favorite").await.unwrap();

        let service = SearchService::new(&repo);
        let request = SearchRequest { query: "hello".to_string(), ..Default::default() };
        let response = service.search(&request).await.unwrap();
        assert!(response.results[0].is_bookmarked);
        assert_eq!(response.results[0].tags, vec!["favorite".to_string()]);
    }

    #[tokio::test]
    async fn per_page_is_clamped_to_valid_range() {
        let repo = seeded_repo().await;
        let service = SearchService::new(&repo);
        let request = SearchRequest { query: "x".to_string(), per_page: 9999, ..Default::default() };
        // Never panics or overflows the LIMIT clause; clamp happens before the query runs.
        let _ = service.search(&request).await.unwrap();
        assert_eq!(request.clamped_per_page(), MAX_PER_PAGE);
    }

    #[tokio::test]
    async fn streaming_hint_is_url_safe() {
        let hint = streaming_hint("/media/Movies/Some Film (2020).mp4");
        assert!(!hint.contains(' '));
        assert!(!hint.contains('('));
    }
}
