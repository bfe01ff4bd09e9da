use crate::clock::{Clock, SystemClock};
use crate::types::{ArticleRecord, SearchResults};
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_QUERY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_QUERIES: u64 = 10_000;
pub const DEFAULT_MAX_ARTICLES: u64 = 10_000;

#[derive(Debug, Clone)]
struct QueryEntry {
    ids: Vec<String>,
    total: u64,
    requested: usize,
    created_at: DateTime<Utc>,
}

/// A cached discovery result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedQuery {
    pub ids: Vec<String>,
    pub total: u64,
    /// Identifiers the original detail fetch asked for.
    pub requested: usize,
}

/// Query -> identifier list (expires after the TTL) and identifier -> article
/// (kept until evicted for space; article metadata does not change).
#[derive(Debug, Clone)]
pub struct ResultCache {
    queries: Cache<String, QueryEntry>,
    articles: Cache<String, ArticleRecord>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_TTL)
    }
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let mut queries = Cache::builder().max_capacity(DEFAULT_MAX_QUERIES);
        if !ttl.is_zero() {
            // Backstop for entries that are never read again.
            queries = queries.time_to_live(ttl);
        }
        Self {
            queries: queries.build(),
            articles: Cache::builder().max_capacity(DEFAULT_MAX_ARTICLES).build(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            clock,
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub async fn put_query(&self, key: &str, ids: Vec<String>, total: u64) {
        let requested = ids.len();
        self.insert_query(key, ids, total, requested).await;
    }

    /// Store the identifiers of `results` together with its hit count and
    /// the size of the detail batch it came from.
    pub async fn put_results(&self, key: &str, results: &SearchResults) {
        let ids = results.articles.iter().map(|a| a.pmid().to_string()).collect();
        self.insert_query(key, ids, results.total, results.requested).await;
    }

    async fn insert_query(&self, key: &str, ids: Vec<String>, total: u64, requested: usize) {
        let entry = QueryEntry {
            ids,
            total,
            requested,
            created_at: self.clock.now(),
        };
        self.queries.insert(key.to_string(), entry).await;
    }

    pub async fn get_query(&self, key: &str) -> Option<CachedQuery> {
        let Some(entry) = self.queries.get(key).await else {
            debug!("query cache miss");
            return None;
        };
        if self.clock.now() - entry.created_at > self.ttl {
            debug!("query cache entry expired");
            self.queries.invalidate(key).await;
            return None;
        }
        debug!("query cache hit");
        Some(CachedQuery {
            ids: entry.ids,
            total: entry.total,
            requested: entry.requested,
        })
    }

    pub async fn get_query_ids(&self, key: &str) -> Option<Vec<String>> {
        self.get_query(key).await.map(|q| q.ids)
    }

    pub async fn put_article(&self, article: ArticleRecord) {
        self.articles.insert(article.pmid().to_string(), article).await;
    }

    pub async fn get_article(&self, pmid: &str) -> Option<ArticleRecord> {
        self.articles.get(pmid).await
    }

    pub fn clear(&self) {
        self.queries.invalidate_all();
        self.articles.invalidate_all();
    }
}
