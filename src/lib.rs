pub mod agent;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod rate_limiter;
pub mod search;
pub mod service;
pub mod task;
pub mod transport;
pub mod types;

pub use agent::{LogPoster, MentionOutcome, Poster, ResearchAgent};
pub use config::Config;
pub use error::{Error, Result, TransportError};
pub use http::{router, AppState};
pub use search::{RetryPolicy, SearchClient};
pub use service::LiteratureService;
pub use types::*;
