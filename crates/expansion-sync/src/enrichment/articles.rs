use std::collections::HashSet;

use chrono::Utc;
use expansion_adapters::{
    clean_article_html, extract_published_date, parse_loose_timestamp, PageFetcher,
};
use expansion_core::{RawArticle, RunStep};
use expansion_storage::{sha256_hex, FetchError};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::Stage;
use crate::error::EngineResult;
use crate::run_log::LogFields;

/// Cleaned text shorter than this is treated as noise.
pub const MIN_ARTICLE_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Pdf,
    HttpStatus(u16),
    TooLarge,
    Unreachable,
    TooShort,
}

impl SkipReason {
    pub fn as_str(&self) -> String {
        match self {
            SkipReason::Pdf => "pdf".to_string(),
            SkipReason::HttpStatus(status) => format!("http {status}"),
            SkipReason::TooLarge => "too large".to_string(),
            SkipReason::Unreachable => "unreachable".to_string(),
            SkipReason::TooShort => "too short".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct FetchReport {
    pub articles: Vec<RawArticle>,
    pub failed: usize,
}

pub fn is_pdf_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase().ends_with(".pdf"))
        .unwrap_or(false)
}

/// Fetches and cleans one page. Nothing is stored here.
pub async fn fetch_article(
    pages: &dyn PageFetcher,
    domain: &str,
    url: &str,
) -> Result<RawArticle, SkipReason> {
    if is_pdf_url(url) {
        return Err(SkipReason::Pdf);
    }

    let response = pages.get(url).await.map_err(|err| match err {
        FetchError::HttpStatus { status, .. } => SkipReason::HttpStatus(status),
        FetchError::TooLarge { .. } => SkipReason::TooLarge,
        FetchError::Request(_) | FetchError::Closed => SkipReason::Unreachable,
    })?;
    if !response.status.is_success() {
        return Err(SkipReason::HttpStatus(response.status.as_u16()));
    }
    let is_pdf = response
        .content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase().contains("application/pdf"))
        .unwrap_or(false);
    if is_pdf {
        return Err(SkipReason::Pdf);
    }

    let html = String::from_utf8_lossy(&response.body);
    let article_text = clean_article_html(&html);
    if article_text.chars().count() < MIN_ARTICLE_CHARS {
        return Err(SkipReason::TooShort);
    }

    let published_date = extract_published_date(&html)
        .ok()
        .flatten()
        .or_else(|| {
            response
                .last_modified
                .as_deref()
                .and_then(parse_loose_timestamp)
                .map(|ts| ts.date_naive())
        });

    Ok(RawArticle {
        domain: domain.to_string(),
        url: url.to_string(),
        content_hash: sha256_hex(article_text.as_bytes()),
        article_text,
        published_date,
        fetched_at: Utc::now(),
    })
}

/// Fetches up to `max_articles` distinct URLs in order, storing each
/// accepted article. Every URL outcome is logged.
pub(crate) async fn fetch_and_store_articles(
    stage: &Stage<'_>,
    pages: &dyn PageFetcher,
    domain: &str,
    urls: &[String],
    max_articles: usize,
) -> EngineResult<FetchReport> {
    let mut seen = HashSet::new();
    let mut report = FetchReport::default();

    for url in urls {
        if report.articles.len() >= max_articles {
            break;
        }
        let url = url.trim();
        if url.is_empty() || !seen.insert(url.to_string()) {
            continue;
        }

        let fields = LogFields::step(RunStep::ExternalEventsFetch).domain(domain);
        match fetch_article(pages, domain, url).await {
            Ok(article) => {
                stage.store.insert_raw_article(&article).await?;
                stage
                    .log
                    .info(
                        stage.run_id,
                        "Article fetch",
                        fields.detail(json!({
                            "url": url,
                            "status": "ok",
                            "articleTextLength": article.article_text.chars().count(),
                        })),
                    )
                    .await;
                report.articles.push(article);
            }
            Err(reason) => {
                debug!(domain, url, reason = %reason.as_str(), "article skipped");
                stage
                    .log
                    .info(
                        stage.run_id,
                        "Article fetch",
                        fields.detail(json!({
                            "url": url,
                            "status": "skipped",
                            "reason": reason.as_str(),
                        })),
                    )
                    .await;
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_urls_are_detected_on_the_path() {
        assert!(is_pdf_url("https://acme.com/reports/Annual.PDF"));
        assert!(!is_pdf_url("https://acme.com/news?file=report.pdf"));
        assert!(!is_pdf_url("not a url.pdf"));
    }
}
