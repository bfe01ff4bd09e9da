//! Glue between inbound mentions, the search service and the outbound
//! messaging client.

use crate::error::Result;
use crate::ledger::MentionLedger;
use crate::service::LiteratureService;
use crate::task::TaskHandle;
use crate::transport::{HttpTransport, Transport};
use crate::types::{ArticleRecord, MentionRequest, SearchQuery, SortOrder};
use rand::seq::SliceRandom;
use regex::Regex;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_REPLY_RESULTS: u32 = 5;
pub const DEFAULT_POST_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

pub const SEARCH_TOPICS: &[&str] = &[
    "Medical Research",
    "Clinical Trials",
    "Healthcare Innovation",
    "Public Health",
    "Disease Prevention",
    "Treatment Advances",
    "Medical Technology",
    "Drug Development",
    "Epidemiology",
    "Precision Medicine",
];

/// Outbound messaging client.
pub trait Poster: Send + Sync {
    fn create_post(&self, text: &str) -> impl Future<Output = Result<()>> + Send;
    fn reply_to(&self, id: &str, text: &str) -> impl Future<Output = Result<()>> + Send;
}

/// A poster that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPoster;

impl Poster for LogPoster {
    async fn create_post(&self, text: &str) -> Result<()> {
        info!("post: {}", text);
        Ok(())
    }

    async fn reply_to(&self, id: &str, text: &str) -> Result<()> {
        info!("reply to {}: {}", id, text);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionOutcome {
    /// Not a research request.
    Ignored,
    /// Already handled earlier.
    Duplicate,
    Replied(String),
    NoResults(String),
    Failed(String),
}

impl MentionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentionOutcome::Ignored => "ignored",
            MentionOutcome::Duplicate => "duplicate",
            MentionOutcome::Replied(_) => "replied",
            MentionOutcome::NoResults(_) => "no_results",
            MentionOutcome::Failed(_) => "failed",
        }
    }

    pub fn reply(&self) -> Option<&str> {
        match self {
            MentionOutcome::Replied(t) | MentionOutcome::NoResults(t) | MentionOutcome::Failed(t) => {
                Some(t)
            }
            MentionOutcome::Ignored | MentionOutcome::Duplicate => None,
        }
    }
}

/// Whether a piece of inbound text asks for a literature search.
pub fn should_handle(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("research") || lower.contains("search")
}

/// The search terms of a mention: the text without `@handle` tokens.
pub fn extract_query(text: &str) -> String {
    static HANDLE: OnceLock<Regex> = OnceLock::new();
    let re = HANDLE.get_or_init(|| Regex::new(r"@\w+").expect("static regex"));
    re.replace_all(text, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn summary_line(article: &ArticleRecord) -> String {
    format!(
        "{} ({}, {}) {}",
        article.title(),
        article.journal(),
        article.year(),
        article.url()
    )
}

#[derive(Debug)]
pub struct ResearchAgent<P, T = HttpTransport> {
    service: Arc<LiteratureService<T>>,
    ledger: Arc<MentionLedger>,
    poster: P,
    max_results: u32,
}

impl<P: Poster, T: Transport> ResearchAgent<P, T> {
    pub fn new(service: Arc<LiteratureService<T>>, ledger: Arc<MentionLedger>, poster: P) -> Self {
        Self {
            service,
            ledger,
            poster,
            max_results: DEFAULT_REPLY_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn ledger(&self) -> &MentionLedger {
        &self.ledger
    }

    pub fn poster(&self) -> &P {
        &self.poster
    }

    /// Search for the mention's text and reply once per mention id.
    pub async fn handle_mention(&self, mention: &MentionRequest) -> Result<MentionOutcome> {
        if !should_handle(&mention.text) {
            return Ok(MentionOutcome::Ignored);
        }
        let query = extract_query(&mention.text);
        if query.is_empty() {
            warn!("mention {} has no search query", mention.id);
            return Ok(MentionOutcome::Ignored);
        }
        if self.ledger.check_and_mark(&mention.id)? {
            info!("Mention {} was already processed", mention.id);
            return Ok(MentionOutcome::Duplicate);
        }

        let search = SearchQuery::new(query.clone())
            .with_max_results(self.max_results)
            .with_sort(SortOrder::Relevance);
        let outcome = match self.service.search(&search).await {
            Ok(results) => match results.articles.first() {
                Some(article) => {
                    info!("Replying to {} with PMID {}", mention.id, article.pmid());
                    MentionOutcome::Replied(summary_line(article))
                }
                None => MentionOutcome::NoResults(format!(
                    "No research found for: \"{}\". Try rephrasing your search.",
                    query
                )),
            },
            Err(e) => {
                error!("Search for mention {} failed: {}", mention.id, e);
                MentionOutcome::Failed(e.user_message())
            }
        };

        if let Some(text) = outcome.reply() {
            match mention.reply_to.as_deref() {
                Some(target) => self.poster.reply_to(target, text).await?,
                None => self.poster.create_post(text).await?,
            }
        }
        Ok(outcome)
    }

    /// Post the newest article on a random topic. Returns the posted PMID.
    pub async fn post_research(&self) -> Result<Option<String>> {
        let topic = SEARCH_TOPICS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("Medical Research");
        let query = SearchQuery::new(topic)
            .with_max_results(self.max_results)
            .with_sort(SortOrder::Date);
        let results = self.service.search(&query).await?;

        let Some(article) = results.articles.first() else {
            info!("No articles found for topic: {}", topic);
            return Ok(None);
        };
        self.poster.create_post(&summary_line(article)).await?;
        info!("Posted research {} on topic {}", article.pmid(), topic);
        Ok(Some(article.pmid().to_string()))
    }
}

impl<P, T> ResearchAgent<P, T>
where
    P: Poster + 'static,
    T: Transport + 'static,
{
    /// Post immediately and then every `interval` until stopped.
    pub fn spawn_scheduler(self: Arc<Self>, interval: Duration) -> TaskHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.post_research().await {
                    error!("Scheduled research post failed: {}", e);
                }
            }
        });
        TaskHandle::new(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::error::TransportError;
    use crate::ledger::LedgerConfig;
    use crate::rate_limiter::RateLimiter;
    use crate::search::tests::{search_body, summary_body, summary_entry, ScriptedTransport};
    use crate::search::SearchClient;
    use crate::transport::Endpoint;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingPoster {
        sent: Mutex<Vec<(Option<String>, String)>>,
    }

    impl RecordingPoster {
        fn sent(&self) -> Vec<(Option<String>, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Poster for RecordingPoster {
        async fn create_post(&self, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push((None, text.to_string()));
            Ok(())
        }

        async fn reply_to(&self, id: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((Some(id.to_string()), text.to_string()));
            Ok(())
        }
    }

    fn agent(transport: ScriptedTransport) -> ResearchAgent<RecordingPoster, ScriptedTransport> {
        let client = SearchClient::new(transport, RateLimiter::per_second(10), "key");
        let service = Arc::new(LiteratureService::new(client, ResultCache::default()));
        let ledger = Arc::new(MentionLedger::new(LedgerConfig::default()));
        ResearchAgent::new(service, ledger, RecordingPoster::default())
    }

    fn mention(id: &str, text: &str) -> MentionRequest {
        MentionRequest {
            id: id.to_string(),
            text: text.to_string(),
            reply_to: Some(id.to_string()),
        }
    }

    fn one_article_transport() -> ScriptedTransport {
        ScriptedTransport::new()
            .on_search(Ok(search_body(&["111"], 1)))
            .on_summary(Ok(summary_body(&[("111", summary_entry("111", "Insulin study"))])))
    }

    #[test]
    fn extract_query_strips_handles() {
        assert_eq!(
            extract_query("@pubmed_bot search   research on @someone diabetes"),
            "search research on diabetes"
        );
        assert!(should_handle("Any RESEARCH on sleep?"));
        assert!(!should_handle("hello there"));
    }

    #[tokio::test]
    async fn mention_is_answered_once() {
        let agent = agent(one_article_transport());
        let m = mention("tweet-1", "@bot research on insulin");

        let outcome = agent.handle_mention(&m).await.unwrap();
        assert_eq!(outcome.as_str(), "replied");
        assert!(outcome.reply().unwrap().contains("Insulin study"));

        let again = agent.handle_mention(&m).await.unwrap();
        assert_eq!(again, MentionOutcome::Duplicate);

        let sent = agent.poster().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_deref(), Some("tweet-1"));
        assert!(agent.ledger().is_processed("tweet-1").unwrap());
    }

    #[tokio::test]
    async fn unrelated_mentions_are_ignored_and_not_recorded() {
        let agent = agent(ScriptedTransport::new());
        let outcome = agent.handle_mention(&mention("t2", "good morning")).await.unwrap();
        assert_eq!(outcome, MentionOutcome::Ignored);
        assert!(agent.ledger().is_empty());
        assert!(agent.poster().sent().is_empty());
    }

    #[tokio::test]
    async fn empty_results_get_a_distinct_reply() {
        let agent = agent(ScriptedTransport::new().on_search(Ok(search_body(&[], 0))));
        let outcome = agent
            .handle_mention(&mention("t3", "search for unicorn medicine"))
            .await
            .unwrap();
        assert!(matches!(outcome, MentionOutcome::NoResults(_)));
        assert!(outcome.reply().unwrap().contains("No research found"));
    }

    #[tokio::test]
    async fn search_failure_replies_without_internals() {
        let transport = ScriptedTransport::new().on_search(Err(TransportError::Status {
            status: 500,
            body: "stack trace secret".into(),
        }));
        let agent = agent(transport);
        let outcome = agent.handle_mention(&mention("t4", "research asthma")).await.unwrap();
        let reply = outcome.reply().unwrap();
        assert!(reply.contains("Unable to complete the search"));
        assert!(!reply.contains("secret"));
    }

    struct FailingPoster;

    impl Poster for FailingPoster {
        async fn create_post(&self, _text: &str) -> Result<()> {
            Err(crate::error::Error::Publish("timeline unavailable".into()))
        }

        async fn reply_to(&self, _id: &str, _text: &str) -> Result<()> {
            Err(crate::error::Error::Publish("timeline unavailable".into()))
        }
    }

    #[tokio::test]
    async fn failed_reply_is_not_retried_for_the_same_mention() {
        let client = SearchClient::new(one_article_transport(), RateLimiter::per_second(10), "key");
        let service = Arc::new(LiteratureService::new(client, ResultCache::default()));
        let ledger = Arc::new(MentionLedger::default());
        let agent = ResearchAgent::new(service, ledger, FailingPoster);
        let m = mention("t5", "research insulin");

        assert!(matches!(
            agent.handle_mention(&m).await,
            Err(crate::error::Error::Publish(_))
        ));
        assert_eq!(
            agent.handle_mention(&m).await.unwrap(),
            MentionOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn post_research_posts_first_article() {
        let agent = agent(one_article_transport());
        let pmid = agent.post_research().await.unwrap();
        assert_eq!(pmid.as_deref(), Some("111"));
        let sent = agent.poster().sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_none());

        let params = agent.service.client().transport().last_params(Endpoint::Search);
        assert!(params.contains(&("sort", "pub_date".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_posts_on_interval_until_stopped() {
        let transport = ScriptedTransport::new()
            .on_search(Ok(search_body(&[], 0)))
            .on_search(Ok(search_body(&[], 0)));
        let agent = Arc::new(agent(transport));

        let handle = agent.clone().spawn_scheduler(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let after_first = agent.service.client().transport().calls_to(Endpoint::Search);
        assert!(after_first >= 1);

        handle.stop();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(
            agent.service.client().transport().calls_to(Endpoint::Search),
            after_first
        );
    }
}
