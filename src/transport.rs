use crate::error::TransportError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The two remote endpoints of the literature search service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Identifier discovery (`esearch`).
    Search,
    /// Batched detail fetch (`esummary`).
    Summary,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Search => "esearch.fcgi",
            Endpoint::Summary => "esummary.fcgi",
        }
    }
}

/// One raw GET against the remote service, returning the response body.
pub trait Transport: Send + Sync {
    fn get(
        &self,
        endpoint: Endpoint,
        params: &[(&'static str, String)],
    ) -> impl Future<Output = Result<String, TransportError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Transport for HttpTransport {
    async fn get(
        &self,
        endpoint: Endpoint,
        params: &[(&'static str, String)],
    ) -> Result<String, TransportError> {
        let url = format!("{}/{}", self.base_url, endpoint.path());
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .query(params)
            .header("User-Agent", "pubmed-agent/0.1")
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.text().await?)
    }
}
