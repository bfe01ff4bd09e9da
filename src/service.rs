use crate::cache::ResultCache;
use crate::error::Result;
use crate::search::SearchClient;
use crate::transport::{HttpTransport, Transport};
use crate::types::{SearchQuery, SearchResults};
use chrono::Utc;
use tracing::debug;

/// Search with the result cache in front of the remote client.
#[derive(Debug, Clone)]
pub struct LiteratureService<T = HttpTransport> {
    client: SearchClient<T>,
    cache: ResultCache,
}

impl<T: Transport> LiteratureService<T> {
    pub fn new(client: SearchClient<T>, cache: ResultCache) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &SearchClient<T> {
        &self.client
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        self.client.require_api_key()?;
        let query = query.normalize(Utc::now().date_naive())?;
        let key = query.cache_key();

        if let Some(cached) = self.cache.get_query(&key).await {
            let mut articles = Vec::with_capacity(cached.ids.len());
            for id in &cached.ids {
                match self.cache.get_article(id).await {
                    Some(article) => articles.push(article),
                    None => break,
                }
            }
            if articles.len() == cached.ids.len() {
                debug!("serving '{}' from cache", query.term);
                return Ok(SearchResults {
                    requested: cached.requested.max(articles.len()),
                    articles,
                    total: cached.total,
                });
            }
            debug!("cached query refers to evicted articles, refetching");
        }

        let results = self.client.search_normalized(&query).await?;
        for article in &results.articles {
            self.cache.put_article(article.clone()).await;
        }
        self.cache.put_results(&key, &results).await;
        Ok(results)
    }
}
