use crate::agent::{LogPoster, ResearchAgent};
use crate::cache::ResultCache;
use crate::config::Config;
use crate::error::Error;
use crate::ledger::{LedgerConfig, MentionLedger};
use crate::rate_limiter::RateLimiter;
use crate::search::SearchClient;
use crate::service::LiteratureService;
use crate::transport::{HttpTransport, Transport};
use crate::types::*;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct AppState<T = HttpTransport> {
    pub service: Arc<LiteratureService<T>>,
    pub ledger: Arc<MentionLedger>,
    pub agent: Arc<ResearchAgent<LogPoster, T>>,
    pub default_max_results: u32,
}

impl<T: Transport> AppState<T> {
    pub fn new(
        service: Arc<LiteratureService<T>>,
        ledger: Arc<MentionLedger>,
        default_max_results: u32,
    ) -> Self {
        let agent = Arc::new(
            ResearchAgent::new(service.clone(), ledger.clone(), LogPoster)
                .with_max_results(default_max_results),
        );
        Self {
            service,
            ledger,
            agent,
            default_max_results,
        }
    }
}

impl AppState<HttpTransport> {
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let transport = HttpTransport::new(&config.base_url, config.request_timeout)
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        let client = SearchClient::new(
            transport,
            RateLimiter::per_second(config.requests_per_second),
            &config.api_key,
        )
        .with_retry_policy(config.retry_policy());
        let service = Arc::new(LiteratureService::new(
            client,
            ResultCache::new(config.query_ttl()),
        ));
        let ledger = Arc::new(MentionLedger::new(LedgerConfig {
            capacity: config.mention_capacity,
            ..LedgerConfig::default()
        }));
        Ok(Self::new(service, ledger, config.max_results))
    }
}

pub fn router<T: Transport + 'static>(state: Arc<AppState<T>>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/search", post(search_handler::<T>))
        .route("/mentions", post(mention_handler::<T>))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "pubmed-agent",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn error_response(e: &Error) -> (StatusCode, Json<ErrorResponse>) {
    let status = match e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Api { .. } | Error::Parse(_) | Error::Publish(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.user_message(),
        }),
    )
}

async fn search_handler<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
    Json(mut request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<ErrorResponse>)> {
    if request.max_results.is_none() {
        request.max_results = Some(state.default_max_results);
    }
    match state.service.search(&request).await {
        Ok(results) => {
            info!("Found {} articles for '{}'", results.articles.len(), request.term);
            Ok(Json(SearchResponse {
                articles: results.articles,
                total: results.total,
            }))
        }
        Err(e) => {
            error!("Search error: {}", e);
            Err(error_response(&e))
        }
    }
}

async fn mention_handler<T: Transport + 'static>(
    State(state): State<Arc<AppState<T>>>,
    Json(request): Json<MentionRequest>,
) -> Result<Json<MentionResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!("Processing mention {}", request.id);
    match state.agent.handle_mention(&request).await {
        Ok(outcome) => Ok(Json(MentionResponse {
            outcome: outcome.as_str().to_string(),
            reply: outcome.reply().map(str::to_string),
        })),
        Err(e) => {
            error!("Mention {} failed: {}", request.id, e);
            Err(error_response(&e))
        }
    }
}
