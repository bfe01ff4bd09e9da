use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::transport::{Endpoint, HttpTransport, Transport};
use crate::types::*;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Bounded exponential backoff: attempt `n` (1-based) that fails transiently
/// waits `base_delay * 2^(n-1)` before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.delay_for(self.max_retries.max(1)))
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Outcome of the discovery phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub ids: Vec<String>,
    pub total: Option<u64>,
}

/// Two-phase PubMed client: identifier discovery, then one batched detail
/// fetch. Every remote call first takes a slot from the shared limiter.
#[derive(Debug, Clone)]
pub struct SearchClient<T = HttpTransport> {
    transport: T,
    limiter: RateLimiter,
    api_key: String,
    retry: RetryPolicy,
}

impl<T: Transport> SearchClient<T> {
    pub fn new(transport: T, limiter: RateLimiter, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            limiter,
            api_key: api_key.into().trim().to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        self.require_api_key()?;
        let query = query.normalize(Utc::now().date_naive())?;
        self.search_normalized(&query).await
    }

    pub async fn search_normalized(&self, query: &NormalizedQuery) -> Result<SearchResults> {
        info!("Searching PubMed for: {}", query.term);

        let discovery = self.discover(query).await?;
        if discovery.ids.is_empty() {
            info!("No PubMed results for: {}", query.term);
            return Ok(SearchResults::empty());
        }

        let articles = self.fetch_articles(&discovery.ids).await?;
        let total = discovery.total.unwrap_or(articles.len() as u64);
        info!(
            "PubMed returned {} of {} requested articles ({} total hits)",
            articles.len(),
            discovery.ids.len(),
            total
        );

        Ok(SearchResults {
            requested: discovery.ids.len(),
            articles,
            total,
        })
    }

    /// Phase one: ordered identifiers for the query.
    pub async fn discover(&self, query: &NormalizedQuery) -> Result<Discovery> {
        self.require_api_key()?;
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("term", query.term.clone()),
            ("retmax", query.max_results.to_string()),
            ("retmode", "json".to_string()),
            ("sort", query.sort.as_param().to_string()),
            ("api_key", self.api_key.clone()),
        ];
        if let Some((from, to)) = query.date_range {
            params.push(("datetype", "pdat".to_string()));
            params.push(("mindate", from.format("%Y/%m/%d").to_string()));
            params.push(("maxdate", to.format("%Y/%m/%d").to_string()));
        }

        let body = self.call(Endpoint::Search, &params).await?;
        let mut discovery = parse_search_response(&body)?;
        discovery.ids.truncate(query.max_results as usize);
        debug!("Discovered {} identifiers", discovery.ids.len());
        Ok(discovery)
    }

    /// Phase two: metadata for all `ids` in one call, in `ids` order.
    /// Missing or malformed entries are skipped.
    pub async fn fetch_articles(&self, ids: &[String]) -> Result<Vec<ArticleRecord>> {
        self.require_api_key()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let params = vec![
            ("db", "pubmed".to_string()),
            ("id", ids.join(",")),
            ("retmode", "json".to_string()),
            ("api_key", self.api_key.clone()),
        ];
        let body = self.call(Endpoint::Summary, &params).await?;
        let articles = parse_summary_response(&body, ids)?;
        if articles.len() < ids.len() {
            warn!(
                requested = ids.len(),
                returned = articles.len(),
                "detail fetch dropped missing or malformed entries"
            );
        }
        Ok(articles)
    }

    pub(crate) fn require_api_key(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(Error::Config("PubMed API key is not configured".into()));
        }
        Ok(())
    }

    async fn call(&self, endpoint: Endpoint, params: &[(&'static str, String)]) -> Result<String> {
        let mut delays = self.retry.backoff();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let err = match self.transport.get(endpoint, params).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };

            if !err.is_transient() {
                error!("{} failed: {}", endpoint.path(), err);
                return Err(Error::Api {
                    message: format!("{} request failed", endpoint.path()),
                    source: Some(err),
                });
            }
            if attempt > self.retry.max_retries {
                error!("{} failed after {} attempts: {}", endpoint.path(), attempt, err);
                return Err(Error::Api {
                    message: format!("{} failed after {} attempts", endpoint.path(), attempt),
                    source: Some(err),
                });
            }

            let delay = delays
                .next_backoff()
                .unwrap_or_else(|| self.retry.delay_for(attempt));
            warn!(
                "{} attempt {}/{} failed ({}), retrying in {:?}",
                endpoint.path(),
                attempt,
                self.retry.max_retries + 1,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

pub fn parse_search_response(body: &str) -> Result<Discovery> {
    let resp: EsearchResponse =
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("esearch: {}", e)))?;
    if let Some(message) = resp.error.filter(|m| !m.is_empty()) {
        return Err(Error::api(format!("PubMed search error: {}", message)));
    }
    let result = resp
        .esearchresult
        .ok_or_else(|| Error::Parse("esearch response has no esearchresult".into()))?;
    if let Some(message) = result.error.filter(|m| !m.is_empty()) {
        return Err(Error::api(format!("PubMed search error: {}", message)));
    }

    let ids = result
        .idlist
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    let total = result.count.as_ref().and_then(parse_count);
    Ok(Discovery { ids, total })
}

fn parse_count(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn parse_summary_response(body: &str, ids: &[String]) -> Result<Vec<ArticleRecord>> {
    let resp: EsummaryResponse =
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("esummary: {}", e)))?;
    if let Some(message) = resp.error.filter(|m| !m.is_empty()) {
        return Err(Error::api(format!("PubMed summary error: {}", message)));
    }
    let result = resp
        .result
        .ok_or_else(|| Error::Parse("esummary response has no result".into()))?;

    let mut articles = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(raw) = result.get(id) else {
            warn!("No summary returned for PMID {}", id);
            continue;
        };
        let entry: SummaryEntry = match serde_json::from_value(raw.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Malformed summary for PMID {}: {}", id, e);
                continue;
            }
        };
        if let Some(message) = entry.error.as_deref() {
            warn!("Summary for PMID {} reported: {}", id, message);
            continue;
        }
        match article_from_summary(id, entry) {
            Ok(article) => articles.push(article),
            Err(e) => warn!("Dropping PMID {}: {}", id, e),
        }
    }
    Ok(articles)
}

fn article_from_summary(id: &str, entry: SummaryEntry) -> Result<ArticleRecord> {
    if let Some(uid) = entry.uid.as_deref() {
        if uid != id {
            return Err(Error::Parse(format!("summary uid {} does not match", uid)));
        }
    }
    let year = [&entry.pubdate, &entry.epubdate, &entry.sortpubdate]
        .into_iter()
        .flatten()
        .find_map(|d| publication_year(d))
        .ok_or_else(|| Error::Parse("no parseable publication date".into()))?;
    let journal = entry
        .fulljournalname
        .clone()
        .filter(|j| !j.trim().is_empty())
        .or_else(|| entry.source.clone())
        .unwrap_or_default();
    let authors = entry.authors.into_iter().map(|a| a.name).collect();
    let doi = entry
        .articleids
        .iter()
        .find(|a| a.idtype.eq_ignore_ascii_case("doi") && !a.value.trim().is_empty())
        .map(|a| a.value.trim().to_string())
        .or_else(|| entry.elocationid.as_deref().and_then(strip_doi_label));

    Ok(ArticleRecord::new(id, entry.title, authors, journal, year)?
        .with_abstract(entry.abstract_text)
        .with_doi(doi))
}

/// First four-digit group of a date such as `2023 Jan 15` or `2023/01/15 00:00`.
pub fn publication_year(date: &str) -> Option<i32> {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    let re = YEAR.get_or_init(|| Regex::new(r"(?:^|\D)(\d{4})(?:\D|$)").expect("static regex"));
    re.captures(date)?.get(1)?.as_str().parse().ok()
}

/// `doi: 10.1000/xyz` -> `10.1000/xyz`. Other labelled identifiers lose their label.
pub fn strip_doi_label(raw: &str) -> Option<String> {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    let doi = match lower.rfind("doi:") {
        Some(pos) => raw[pos + 4..].split_whitespace().next().unwrap_or(""),
        None => {
            let re = LABEL.get_or_init(|| Regex::new(r"^[A-Za-z]+:\s*").expect("static regex"));
            return Some(re.replace(raw, "").trim().to_string()).filter(|d| !d.is_empty());
        }
    };
    Some(doi.to_string()).filter(|d| !d.is_empty())
}
