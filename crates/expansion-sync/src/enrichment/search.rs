use chrono::Utc;
use expansion_adapters::{AdapterError, DateRange, SearchProvider};
use expansion_core::{RunStep, SearchQuery, SearchResultRecord};
use serde_json::json;
use tracing::debug;

use super::{DomainError, Stage};
use crate::run_log::LogFields;

/// Runs every query for one domain and persists each hit. A query the
/// provider rejects yields no hits; an unreachable provider aborts the domain.
pub(crate) async fn search_and_store(
    stage: &Stage<'_>,
    provider: &dyn SearchProvider,
    domain: &str,
    queries: &[SearchQuery],
    range: &DateRange,
) -> Result<Vec<SearchResultRecord>, DomainError> {
    let mut rows = Vec::new();

    for query in queries {
        let category = query.category.as_str();
        let hits = match provider.search(&query.query, range).await {
            Ok(hits) => hits,
            Err(err @ AdapterError::Unreachable { .. }) => {
                return Err(DomainError::SearchUnavailable(err.to_string()));
            }
            Err(err) => {
                stage
                    .log
                    .warn(
                        stage.run_id,
                        format!("Search query failed: {category}"),
                        LogFields::step(RunStep::ExternalEventsSearch)
                            .domain(domain)
                            .detail(json!({
                                "query": query.query,
                                "category": category,
                                "error": err.to_string(),
                            })),
                    )
                    .await;
                continue;
            }
        };

        let searched_at = Utc::now();
        let batch: Vec<SearchResultRecord> = hits
            .into_iter()
            .map(|hit| SearchResultRecord {
                domain: domain.to_string(),
                query: query.query.clone(),
                category: query.category,
                url: hit.url,
                title: hit.title,
                snippet: hit.snippet,
                searched_at,
            })
            .collect();
        stage.store.insert_search_results(&batch).await?;
        debug!(domain, provider = provider.name(), category, hits = batch.len(), "search query done");

        stage
            .log
            .info(
                stage.run_id,
                format!("Search query: {category}"),
                LogFields::step(RunStep::ExternalEventsSearch)
                    .domain(domain)
                    .detail(json!({
                        "query": query.query,
                        "category": category,
                        "resultCount": batch.len(),
                        "rows": batch
                            .iter()
                            .map(|r| json!({ "url": r.url, "title": r.title }))
                            .collect::<Vec<_>>(),
                    })),
            )
            .await;

        rows.extend(batch);
    }

    Ok(rows)
}
