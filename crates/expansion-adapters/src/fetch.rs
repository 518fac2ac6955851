use async_trait::async_trait;
use expansion_storage::{FetchError, FetchedResponse, HttpFetcher};

pub const ARTICLE_USER_AGENT: &str =
    "ExpansionSignalBot/1.0 (external events enrichment; no LinkedIn)";

/// HTTP GET boundary: URL in, bytes plus headers out.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError>;
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.fetch_bytes(url).await
    }
}
