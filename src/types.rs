use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MAX_RESULTS: u32 = 10;
pub const MAX_RESULTS_CAP: u32 = 100;
pub const MAX_TERM_CHARS: usize = 500;
pub const PUBMED_ARTICLE_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Relevance,
    Date,
}

impl SortOrder {
    /// Value of the remote `sort` parameter.
    pub fn as_param(&self) -> &'static str {
        match self {
            SortOrder::Relevance => "relevance",
            SortOrder::Date => "pub_date",
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::Relevance => f.write_str("relevance"),
            SortOrder::Date => f.write_str("date"),
        }
    }
}

/// A search as callers phrase it. Dates are `YYYY-MM-DD`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub term: String,
    #[serde(default)]
    pub max_results: Option<u32>,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default)]
    pub from_date: Option<NaiveDate>,
    #[serde(default)]
    pub to_date: Option<NaiveDate>,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Default::default()
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.from_date = from;
        self.to_date = to;
        self
    }

    /// Validate and canonicalize against `today`.
    pub fn normalize(&self, today: NaiveDate) -> Result<NormalizedQuery> {
        let term = self.term.split_whitespace().collect::<Vec<_>>().join(" ");
        if term.is_empty() {
            return Err(Error::Validation("search term is required".into()));
        }
        if term.chars().count() > MAX_TERM_CHARS {
            return Err(Error::Validation(format!(
                "search term too long: maximum {} characters",
                MAX_TERM_CHARS
            )));
        }

        let max_results = match self.max_results {
            Some(0) => return Err(Error::Validation("max_results must be positive".into())),
            Some(n) => n.min(MAX_RESULTS_CAP),
            None => DEFAULT_MAX_RESULTS,
        };

        let date_range = match (self.from_date, self.to_date) {
            (None, None) => None,
            (from, to) => {
                let earliest = earliest_date();
                let from = from.unwrap_or(earliest);
                let to = to.unwrap_or(today);
                if from < earliest {
                    return Err(Error::Validation("from_date must be on or after 1900-01-01".into()));
                }
                if to > today {
                    return Err(Error::Validation("to_date cannot be in the future".into()));
                }
                if from > to {
                    return Err(Error::Validation("from_date must not be after to_date".into()));
                }
                Some((from, to))
            }
        };

        Ok(NormalizedQuery {
            term,
            max_results,
            sort: self.sort,
            date_range,
        })
    }
}

fn earliest_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// A validated query: trimmed term, bounded result count, ordered date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub term: String,
    pub max_results: u32,
    pub sort: SortOrder,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl NormalizedQuery {
    /// Composite key so that different parameters never share a cache entry.
    pub fn cache_key(&self) -> String {
        let (from, to) = match self.date_range {
            Some((from, to)) => (from.to_string(), to.to_string()),
            None => (String::new(), String::new()),
        };
        format!(
            "q={}|max={}|sort={}|from={}|to={}",
            self.term.to_lowercase(),
            self.max_results,
            self.sort,
            from,
            to
        )
    }
}

/// One normalized search hit. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleRecord {
    pmid: String,
    title: String,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    abstract_text: Option<String>,
    authors: Vec<String>,
    journal: String,
    year: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    doi: Option<String>,
}

impl ArticleRecord {
    pub fn new(
        pmid: impl Into<String>,
        title: impl Into<String>,
        authors: Vec<String>,
        journal: impl Into<String>,
        year: i32,
    ) -> Result<Self> {
        let pmid = pmid.into().trim().to_string();
        if pmid.is_empty() || pmid.len() > 20 || !pmid.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Validation(format!("invalid PMID '{}'", pmid)));
        }
        let title = title.into().split_whitespace().collect::<Vec<_>>().join(" ");
        if title.is_empty() {
            return Err(Error::Validation(format!("article {} has no title", pmid)));
        }
        let authors: Vec<String> = authors
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if authors.is_empty() {
            return Err(Error::Validation(format!("article {} has no authors", pmid)));
        }
        let journal = journal.into().trim().to_string();
        if journal.is_empty() {
            return Err(Error::Validation(format!("article {} has no journal", pmid)));
        }
        let current_year = Utc::now().year();
        if !(1900..=current_year).contains(&year) {
            return Err(Error::Validation(format!(
                "article {} has publication year {} outside 1900..={}",
                pmid, year, current_year
            )));
        }

        Ok(Self {
            url: format!("{}/{}/", PUBMED_ARTICLE_URL, pmid),
            pmid,
            title,
            abstract_text: None,
            authors,
            journal,
            year: format!("{:04}", year),
            doi: None,
        })
    }

    pub fn with_abstract(mut self, abstract_text: Option<String>) -> Self {
        self.abstract_text = abstract_text
            .map(|a| a.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|a| !a.is_empty());
        self
    }

    pub fn with_doi(mut self, doi: Option<String>) -> Self {
        self.doi = doi.filter(|d| !d.is_empty());
        self
    }

    pub fn pmid(&self) -> &str {
        &self.pmid
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.abstract_text.as_deref()
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    pub fn journal(&self) -> &str {
        &self.journal
    }

    pub fn year(&self) -> &str {
        &self.year
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn doi(&self) -> Option<&str> {
        self.doi.as_deref()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    pub articles: Vec<ArticleRecord>,
    pub total: u64,
    /// Identifiers sent to the detail fetch. Larger than `articles.len()`
    /// when entries were missing or malformed.
    #[serde(skip)]
    pub requested: usize,
}

impl SearchResults {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn dropped(&self) -> usize {
        self.requested.saturating_sub(self.articles.len())
    }
}

// HTTP surface types

pub type SearchRequest = SearchQuery;

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub articles: Vec<ArticleRecord>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionRequest {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MentionResponse {
    pub outcome: String,
    #[serde(default)]
    pub reply: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// E-utilities wire types

#[derive(Debug, Deserialize)]
pub struct EsearchResponse {
    #[serde(default)]
    pub esearchresult: Option<EsearchResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EsearchResult {
    #[serde(default)]
    pub idlist: Vec<String>,
    #[serde(default)]
    pub count: Option<serde_json::Value>,
    #[serde(rename = "ERROR", default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EsummaryResponse {
    #[serde(default)]
    pub result: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryEntry {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub authors: Vec<SummaryAuthor>,
    #[serde(default)]
    pub fulljournalname: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub pubdate: Option<String>,
    #[serde(default)]
    pub epubdate: Option<String>,
    #[serde(default)]
    pub sortpubdate: Option<String>,
    #[serde(default)]
    pub elocationid: Option<String>,
    #[serde(default)]
    pub articleids: Vec<SummaryArticleId>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryAuthor {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SummaryArticleId {
    #[serde(default)]
    pub idtype: String,
    #[serde(default)]
    pub value: String,
}
