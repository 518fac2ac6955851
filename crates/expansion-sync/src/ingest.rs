use chrono::Utc;
use expansion_adapters::IngestBundle;
use expansion_storage::EngineStore;
use serde::Serialize;
use tracing::info;

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub accounts: usize,
    pub telemetry: usize,
    pub opportunities: usize,
    pub events: usize,
}

/// Upserts accounts and telemetry, then appends opportunities and events.
pub async fn ingest_bundle(store: &dyn EngineStore, bundle: IngestBundle) -> EngineResult<IngestSummary> {
    let bundle = bundle.normalized();
    let summary = IngestSummary {
        accounts: bundle.accounts.len(),
        telemetry: bundle.telemetry.len(),
        opportunities: bundle.opportunities.len(),
        events: bundle.events.len(),
    };

    for account in &bundle.accounts {
        store.upsert_account(account).await?;
    }
    for row in &bundle.telemetry {
        store.upsert_telemetry(row).await?;
    }
    for opportunity in &bundle.opportunities {
        store.upsert_opportunity(opportunity).await?;
    }
    let created_at = Utc::now();
    for event in bundle.events {
        store.insert_event(&event.into_event(created_at)).await?;
    }

    info!(
        accounts = summary.accounts,
        telemetry = summary.telemetry,
        opportunities = summary.opportunities,
        events = summary.events,
        "ingest bundle stored"
    );
    Ok(summary)
}
