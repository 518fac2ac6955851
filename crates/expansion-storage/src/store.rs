use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use expansion_core::{
    Account, AtomicSignal, ExternalEvent, LiftStat, LlmEvaluation, LogDraft, Opportunity,
    RawArticle, Run, RunLogEntry, SearchResultRecord, StoredSnapshot, TelemetryRow,
};
use uuid::Uuid;

/// Every read and write the pipeline performs.
///
/// Uniqueness rules match the SQL schema: accounts by domain, telemetry by
/// (domain, month), signals by (domain, month, signal_type), snapshots and
/// evaluations by (run, domain), log entries by (run, seq).
#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn upsert_account(&self, account: &Account) -> Result<()>;
    async fn get_account(&self, domain: &str) -> Result<Option<Account>>;
    /// All accounts ordered by domain.
    async fn list_accounts(&self) -> Result<Vec<Account>>;
    async fn mark_account_enriched(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        run_id: Uuid,
    ) -> Result<()>;

    async fn upsert_telemetry(&self, row: &TelemetryRow) -> Result<()>;
    /// Ordered by month.
    async fn telemetry_for_domain(&self, domain: &str) -> Result<Vec<TelemetryRow>>;
    async fn latest_telemetry_month_before(&self, before: NaiveDate) -> Result<Option<NaiveDate>>;

    async fn upsert_opportunity(&self, opportunity: &Opportunity) -> Result<()>;
    async fn closed_won_opportunities(&self) -> Result<Vec<Opportunity>>;

    async fn insert_search_results(&self, rows: &[SearchResultRecord]) -> Result<()>;
    async fn insert_raw_article(&self, article: &RawArticle) -> Result<()>;

    async fn insert_event(&self, event: &ExternalEvent) -> Result<()>;
    async fn events_for_domain(&self, domain: &str) -> Result<Vec<ExternalEvent>>;

    async fn upsert_signal(&self, signal: &AtomicSignal) -> Result<()>;
    async fn signals_for(&self, domain: &str, month: NaiveDate) -> Result<Vec<AtomicSignal>>;
    async fn signals_with_version(&self, version: &str) -> Result<Vec<AtomicSignal>>;

    async fn insert_lift_stat(&self, stat: &LiftStat) -> Result<()>;
    /// Full history, oldest first.
    async fn lift_stats(&self) -> Result<Vec<LiftStat>>;

    async fn insert_run(&self, run: &Run) -> Result<()>;
    async fn save_run(&self, run: &Run) -> Result<()>;
    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>>;

    /// Appends with `seq = max(seq) + 1` for the run.
    async fn append_log(&self, draft: &LogDraft) -> Result<RunLogEntry>;
    /// Entries with `seq > since`, ascending, at most `limit`.
    async fn logs_since(&self, run_id: Uuid, since: i64, limit: usize) -> Result<Vec<RunLogEntry>>;
    /// Newest `count` entries, descending.
    async fn logs_tail(&self, run_id: Uuid, count: usize) -> Result<Vec<RunLogEntry>>;

    async fn get_snapshot(&self, run_id: Uuid, domain: &str) -> Result<Option<StoredSnapshot>>;
    async fn insert_snapshot(&self, snapshot: &StoredSnapshot) -> Result<()>;
    async fn snapshots_for_run(&self, run_id: Uuid) -> Result<Vec<StoredSnapshot>>;

    /// Fails when (run, domain) already has an evaluation.
    async fn insert_evaluation(&self, evaluation: &LlmEvaluation) -> Result<()>;
    async fn evaluations_for_run(&self, run_id: Uuid) -> Result<Vec<LlmEvaluation>>;
    async fn evaluated_domains(&self, run_id: Uuid) -> Result<HashSet<String>>;
}
