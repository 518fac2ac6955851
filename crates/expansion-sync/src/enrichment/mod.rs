//! External-event enrichment: query builder, search, article fetch, event
//! extraction and dedupe/store, run per domain in sequence.

pub mod articles;
pub mod dedupe;
pub mod extract;
pub mod queries;
pub(crate) mod search;

use expansion_adapters::{DateRange, LanguageModel, PageFetcher, SearchProvider};
use expansion_core::{EnrichmentSummary, Progress, Run, RunStep};
use expansion_storage::EngineStore;
use serde_json::json;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::run_log::{LogFields, RunLog};

/// URLs echoed in the per-domain search log entry.
const LOGGED_URLS: usize = 10;

/// Store and log handles shared by the layers for one run.
pub(crate) struct Stage<'a> {
    pub store: &'a dyn EngineStore,
    pub log: &'a RunLog,
    pub run_id: Uuid,
}

#[derive(Debug)]
pub(crate) enum DomainError {
    SearchUnavailable(String),
    Failed(EngineError),
}

impl From<EngineError> for DomainError {
    fn from(err: EngineError) -> Self {
        DomainError::Failed(err)
    }
}

impl From<anyhow::Error> for DomainError {
    fn from(err: anyhow::Error) -> Self {
        DomainError::Failed(EngineError::Other(err))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnrichmentLimits {
    pub max_domains: usize,
    pub max_articles_per_domain: usize,
    pub search_range: DateRange,
}

pub(crate) struct Enricher<'a> {
    pub store: &'a dyn EngineStore,
    pub log: &'a RunLog,
    pub search: &'a dyn SearchProvider,
    pub pages: &'a dyn PageFetcher,
    pub model: &'a dyn LanguageModel,
    pub limits: EnrichmentLimits,
    pub event_prompt: String,
}

impl Enricher<'_> {
    /// Enriches up to `max_domains` of `domains`. Domain failures are
    /// counted in the summary; only store failures on the run row escape.
    pub async fn run(&self, run: &mut Run, domains: &[String]) -> EngineResult<EnrichmentSummary> {
        let run_id = run.id;
        self.log
            .info(
                run_id,
                "External events enrichment started",
                LogFields::step(RunStep::ExternalEvents).detail(json!({
                    "maxDomains": self.limits.max_domains,
                    "domainCount": domains.len(),
                })),
            )
            .await;

        let slice = &domains[..domains.len().min(self.limits.max_domains)];
        let mut summary = EnrichmentSummary::default();

        for (d, domain) in slice.iter().enumerate() {
            self.progress(
                run,
                Progress::step(RunStep::ExternalEventsQueryBuilder)
                    .domain(domain.as_str())
                    .substep(format!("Domain {} of {}", d + 1, slice.len())),
            )
            .await?;

            let outcome = self
                .enrich_domain(run, domain, &mut summary)
                .instrument(info_span!("enrich_domain", %run_id, domain = %domain))
                .await;

            match outcome {
                Ok(()) => summary.domains_processed += 1,
                Err(DomainError::SearchUnavailable(msg)) => {
                    summary.errors.push(format!("{domain}: search failed - {msg}"));
                    summary.domains_skipped += 1;
                    self.log
                        .warn(
                            run_id,
                            format!("Search failed for {domain}: {msg}"),
                            LogFields::step(RunStep::ExternalEventsSearch)
                                .domain(domain.as_str())
                                .detail(json!({ "error": msg })),
                        )
                        .await;
                }
                Err(DomainError::Failed(err)) => {
                    let msg = err.to_string();
                    summary.errors.push(format!("{domain}: {msg}"));
                    summary.domains_skipped += 1;
                    self.log
                        .error(
                            run_id,
                            format!("Domain {domain} failed: {msg}"),
                            LogFields::step(RunStep::ExternalEvents)
                                .domain(domain.as_str())
                                .detail(json!({ "error": msg })),
                        )
                        .await;
                }
            }
        }

        self.log
            .info(
                run_id,
                "External events enrichment finished",
                LogFields::step(RunStep::ExternalEvents).detail(json!({
                    "domainsProcessed": summary.domains_processed,
                    "domainsSkipped": summary.domains_skipped,
                    "articlesFetched": summary.articles_fetched,
                    "articlesFailed": summary.articles_failed,
                    "eventsStored": summary.events_stored,
                    "errors": summary.errors,
                })),
            )
            .await;

        Ok(summary)
    }

    async fn progress(&self, run: &mut Run, progress: Progress) -> EngineResult<()> {
        run.apply(progress);
        self.store.save_run(run).await?;
        Ok(())
    }

    async fn enrich_domain(
        &self,
        run: &mut Run,
        domain: &str,
        summary: &mut EnrichmentSummary,
    ) -> Result<(), DomainError> {
        let stage = Stage {
            store: self.store,
            log: self.log,
            run_id: run.id,
        };
        let account_name = self
            .store
            .get_account(domain)
            .await?
            .map(|a| a.account_name)
            .unwrap_or_default();

        let queries = queries::build_search_queries(domain, &account_name);
        self.log
            .info(
                run.id,
                format!("Queries built for {domain}"),
                LogFields::step(RunStep::ExternalEventsQueryBuilder)
                    .domain(domain)
                    .detail(json!({ "count": queries.len() })),
            )
            .await;

        self.progress(
            run,
            Progress::step(RunStep::ExternalEventsSearch)
                .domain(domain)
                .substep(format!("Searching {} queries", queries.len())),
        )
        .await?;
        let rows = search::search_and_store(
            &stage,
            self.search,
            domain,
            &queries,
            &self.limits.search_range,
        )
        .await?;
        let urls: Vec<String> = rows.into_iter().map(|r| r.url).collect();
        self.log
            .info(
                run.id,
                format!("Search results for {domain}"),
                LogFields::step(RunStep::ExternalEventsSearch)
                    .domain(domain)
                    .detail(json!({
                        "urlCount": urls.len(),
                        "urls": urls.iter().take(LOGGED_URLS).collect::<Vec<_>>(),
                    })),
            )
            .await;

        self.progress(
            run,
            Progress::step(RunStep::ExternalEventsFetch)
                .domain(domain)
                .substep(format!("Fetching articles for {domain}")),
        )
        .await?;
        let report = articles::fetch_and_store_articles(
            &stage,
            self.pages,
            domain,
            &urls,
            self.limits.max_articles_per_domain,
        )
        .await?;
        summary.articles_fetched += report.articles.len();
        summary.articles_failed += report.failed;

        let total = report.articles.len();
        let mut events_from_domain = 0;
        for (a, article) in report.articles.iter().enumerate() {
            let substep = format!("Article {}/{}: {domain}", a + 1, total);
            self.progress(
                run,
                Progress::step(RunStep::ExternalEventsExtract)
                    .domain(domain)
                    .substep(substep.clone()),
            )
            .await?;

            self.log
                .info(
                    run.id,
                    "LLM extract input",
                    LogFields::step(RunStep::ExternalEventsExtract)
                        .domain(domain)
                        .detail(json!({
                            "source_url": article.url,
                            "published_date": article.published_date.map(|d| d.to_string()),
                            "articleTextLength": article.article_text.chars().count(),
                        })),
                )
                .await;

            let candidates =
                match extract::extract_events(self.model, &self.event_prompt, article).await {
                    Ok(candidates) => candidates,
                    Err(err) => {
                        summary.articles_failed += 1;
                        self.log
                            .warn(
                                run.id,
                                format!("Extraction failed for {}: {err}", article.url),
                                LogFields::step(RunStep::ExternalEventsExtract)
                                    .domain(domain)
                                    .detail(json!({ "url": article.url, "error": err.to_string() })),
                            )
                            .await;
                        continue;
                    }
                };

            self.log
                .info(
                    run.id,
                    "LLM extract output",
                    LogFields::step(RunStep::ExternalEventsExtract)
                        .domain(domain)
                        .detail(json!({
                            "events": candidates
                                .iter()
                                .map(|c| json!({
                                    "event_type": c.event_type.as_str(),
                                    "event_ts": c.raw_ts,
                                    "confidence": c.confidence,
                                    "summary": c.summary,
                                }))
                                .collect::<Vec<_>>(),
                            "url": article.url,
                        })),
                )
                .await;

            self.progress(
                run,
                Progress::step(RunStep::ExternalEventsDedupeStore)
                    .domain(domain)
                    .substep(substep),
            )
            .await?;
            let extracted = candidates.len();
            let stored = dedupe::dedupe_and_store(&stage, domain, candidates).await?;
            events_from_domain += stored;

            self.log
                .info(
                    run.id,
                    format!("Article extracted: {}", article.url),
                    LogFields::step(RunStep::ExternalEventsExtract)
                        .domain(domain)
                        .detail(json!({
                            "eventsExtracted": extracted,
                            "eventsStored": stored,
                            "url": article.url,
                        })),
                )
                .await;
        }

        summary.events_stored += events_from_domain;
        self.log
            .info(
                run.id,
                format!("Domain {domain} completed"),
                LogFields::step(RunStep::ExternalEventsDedupeStore)
                    .domain(domain)
                    .detail(json!({
                        "articlesFetched": total,
                        "eventsFromDomain": events_from_domain,
                    })),
            )
            .await;
        Ok(())
    }
}
