//! External boundaries: search providers, the language-model client, page
//! fetching and HTML cleaning, the prompt library and bulk ingestion files.

mod fetch;
mod html;
mod ingest;
mod llm;
mod prompts;
mod search;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use fetch::{PageFetcher, ARTICLE_USER_AGENT};
pub use html::{
    clean_article_html, extract_published_date, parse_loose_timestamp, MAX_ARTICLE_CHARS,
};
pub use ingest::{load_ingest_bundle, IngestBundle, IngestEvent};
pub use llm::{
    extract_json_object, openai_schema, CompletionRequest, LanguageModel, OpenAiChatModel,
    ResponseSchema, DEFAULT_LLM_BASE_URL,
};
pub use prompts::{
    PromptKind, PromptLibrary, PromptMeta, DEFAULT_EVALUATION_PROMPT_ID, DEFAULT_EVENT_PROMPT_ID,
};
pub use search::{
    build_search_provider, DateRange, DisabledSearch, NewsApiProvider, SearchHit,
    SearchProvider, SearchProviderKind, SerperProvider, MAX_RESULTS_PER_QUERY,
};

pub const CRATE_NAME: &str = "expansion-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Missing credentials or an unusable setting.
    #[error("configuration error: {0}")]
    Config(String),
    /// The provider answered with a non-success status.
    #[error("{provider} returned {status}: {body}")]
    Provider {
        provider: &'static str,
        status: u16,
        body: String,
    },
    /// The provider could not be reached at all.
    #[error("{provider} unreachable: {source}")]
    Unreachable {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid model output: {0}")]
    InvalidOutput(String),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
