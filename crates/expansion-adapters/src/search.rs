use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{text_or_none, AdapterError};

pub const MAX_RESULTS_PER_QUERY: usize = 10;

const NEWSAPI_ENDPOINT: &str = "https://newsapi.org/v2/everything";
const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";
const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
}

/// Inclusive publication window passed to providers that support one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn trailing_months(today: NaiveDate, months: u32) -> Self {
        let from = today
            .checked_sub_months(Months::new(months))
            .unwrap_or(today);
        Self { from, to: today }
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// At most [`MAX_RESULTS_PER_QUERY`] hits. A provider that is not
    /// configured returns an empty list instead of failing.
    async fn search(&self, query: &str, range: &DateRange) -> Result<Vec<SearchHit>, AdapterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProviderKind {
    NewsApi,
    Serper,
    Disabled,
}

impl FromStr for SearchProviderKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newsapi" => Ok(Self::NewsApi),
            "serper" => Ok(Self::Serper),
            "none" | "disabled" | "" => Ok(Self::Disabled),
            other => Err(AdapterError::Config(format!(
                "unknown search provider `{other}`"
            ))),
        }
    }
}

impl SearchProviderKind {
    /// Picks the explicit choice when given, else the first provider with a key.
    pub fn select(
        explicit: Option<&str>,
        news_api_key: Option<&str>,
        serper_api_key: Option<&str>,
    ) -> Result<Self, AdapterError> {
        match explicit {
            Some(name) => name.parse(),
            None if news_api_key.is_some() => Ok(Self::NewsApi),
            None if serper_api_key.is_some() => Ok(Self::Serper),
            None => Ok(Self::Disabled),
        }
    }
}

pub fn build_search_provider(
    kind: SearchProviderKind,
    news_api_key: Option<String>,
    serper_api_key: Option<String>,
    timeout: Duration,
) -> Result<Arc<dyn SearchProvider>, AdapterError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AdapterError::Config(format!("building search client: {e}")))?;

    match kind {
        SearchProviderKind::NewsApi => {
            let key = news_api_key
                .ok_or_else(|| AdapterError::Config("NEWS_API_KEY is not set".into()))?;
            Ok(Arc::new(NewsApiProvider::new(client, key)))
        }
        SearchProviderKind::Serper => {
            let key = serper_api_key
                .ok_or_else(|| AdapterError::Config("SERPER_API_KEY is not set".into()))?;
            Ok(Arc::new(SerperProvider::new(client, key)))
        }
        SearchProviderKind::Disabled => Ok(Arc::new(DisabledSearch)),
    }
}

/// Stand-in used when no provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSearch;

#[async_trait]
impl SearchProvider for DisabledSearch {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn search(&self, _query: &str, _range: &DateRange) -> Result<Vec<SearchHit>, AdapterError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct NewsApiProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl NewsApiProvider {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            endpoint: NEWSAPI_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsApiArticle {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

impl NewsApiResponse {
    fn into_hits(self) -> Vec<SearchHit> {
        self.articles
            .into_iter()
            .filter_map(|a| {
                let url = a.url.as_deref().and_then(text_or_none)?;
                Some(SearchHit {
                    url,
                    title: a.title.as_deref().and_then(text_or_none),
                    snippet: a.description.as_deref().and_then(text_or_none),
                })
            })
            .take(MAX_RESULTS_PER_QUERY)
            .collect()
    }
}

#[async_trait]
impl SearchProvider for NewsApiProvider {
    fn name(&self) -> &'static str {
        "newsapi"
    }

    async fn search(&self, query: &str, range: &DateRange) -> Result<Vec<SearchHit>, AdapterError> {
        debug!(query, "newsapi search");
        let page_size = MAX_RESULTS_PER_QUERY.to_string();
        let from = range.from.to_string();
        let to = range.to.to_string();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("pageSize", page_size.as_str()),
                ("language", "en"),
                ("apiKey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|source| AdapterError::Unreachable {
                provider: "newsapi",
                source,
            })?;

        let body: NewsApiResponse = read_provider_json("newsapi", resp).await?;
        Ok(body.into_hits())
    }
}

#[derive(Debug, Clone)]
pub struct SerperProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SerperProvider {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            endpoint: SERPER_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    link: Option<String>,
    title: Option<String>,
    snippet: Option<String>,
}

impl SerperResponse {
    fn into_hits(self) -> Vec<SearchHit> {
        self.organic
            .into_iter()
            .filter_map(|o| {
                let url = o.link.as_deref().and_then(text_or_none)?;
                Some(SearchHit {
                    url,
                    title: o.title.as_deref().and_then(text_or_none),
                    snippet: o.snippet.as_deref().and_then(text_or_none),
                })
            })
            .take(MAX_RESULTS_PER_QUERY)
            .collect()
    }
}

#[async_trait]
impl SearchProvider for SerperProvider {
    fn name(&self) -> &'static str {
        "serper"
    }

    // Serper has no date filter on the organic endpoint; the window is ignored.
    async fn search(&self, query: &str, _range: &DateRange) -> Result<Vec<SearchHit>, AdapterError> {
        debug!(query, "serper search");
        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({ "q": query, "num": MAX_RESULTS_PER_QUERY }))
            .send()
            .await
            .map_err(|source| AdapterError::Unreachable {
                provider: "serper",
                source,
            })?;

        let body: SerperResponse = read_provider_json("serper", resp).await?;
        Ok(body.into_hits())
    }
}

async fn read_provider_json<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    resp: reqwest::Response,
) -> Result<T, AdapterError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AdapterError::Provider {
            provider,
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_PREVIEW).collect(),
        });
    }
    resp.json()
        .await
        .map_err(|e| AdapterError::Message(format!("{provider} response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_spans_trailing_months() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 31).unwrap();
        let range = DateRange::trailing_months(today, 6);
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
        assert_eq!(range.to, today);
    }

    #[test]
    fn provider_selection_prefers_explicit_then_keys() {
        assert_eq!(
            SearchProviderKind::select(Some("serper"), Some("k"), None).unwrap(),
            SearchProviderKind::Serper
        );
        assert_eq!(
            SearchProviderKind::select(None, Some("k"), Some("s")).unwrap(),
            SearchProviderKind::NewsApi
        );
        assert_eq!(
            SearchProviderKind::select(None, None, Some("s")).unwrap(),
            SearchProviderKind::Serper
        );
        assert_eq!(
            SearchProviderKind::select(None, None, None).unwrap(),
            SearchProviderKind::Disabled
        );
        assert!(SearchProviderKind::select(Some("bing"), None, None).is_err());
    }

    #[test]
    fn explicit_provider_without_key_is_config_error() {
        let err = build_search_provider(
            SearchProviderKind::NewsApi,
            None,
            None,
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AdapterError::Config(_)));
    }

    #[test]
    fn newsapi_articles_without_url_are_dropped() {
        let body: NewsApiResponse = serde_json::from_value(json!({
            "status": "ok",
            "articles": [
                { "url": "https://news.example/a", "title": "Acme names CLO", "description": "" },
                { "url": null, "title": "orphan" },
                { "url": "  ", "title": "blank" }
            ]
        }))
        .unwrap();
        let hits = body.into_hits();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://news.example/a");
        assert_eq!(hits[0].title.as_deref(), Some("Acme names CLO"));
        assert_eq!(hits[0].snippet, None);
    }

    #[test]
    fn serper_organic_results_are_capped() {
        let organic: Vec<_> = (0..15)
            .map(|i| json!({ "link": format!("https://s.example/{i}"), "snippet": "x" }))
            .collect();
        let body: SerperResponse = serde_json::from_value(json!({ "organic": organic })).unwrap();
        assert_eq!(body.into_hits().len(), MAX_RESULTS_PER_QUERY);
    }

    #[tokio::test]
    async fn disabled_search_returns_nothing() {
        let range = DateRange::trailing_months(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), 6);
        assert!(DisabledSearch.search("acme layoffs", &range).await.unwrap().is_empty());
    }
}
