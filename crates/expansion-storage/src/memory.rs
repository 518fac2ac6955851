use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use expansion_core::{
    Account, AtomicSignal, ExternalEvent, LiftStat, LlmEvaluation, LogDraft, Opportunity,
    RawArticle, Run, RunLogEntry, RunStep, SearchResultRecord, SignalType, StoredSnapshot,
    TelemetryRow,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::EngineStore;

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<String, Account>,
    telemetry: BTreeMap<(String, NaiveDate), TelemetryRow>,
    opportunities: BTreeMap<String, Opportunity>,
    search_results: Vec<SearchResultRecord>,
    raw_articles: Vec<RawArticle>,
    events: Vec<ExternalEvent>,
    signals: BTreeMap<(String, NaiveDate, SignalType), AtomicSignal>,
    lift_stats: Vec<LiftStat>,
    runs: HashMap<Uuid, Run>,
    run_log: HashMap<Uuid, Vec<RunLogEntry>>,
    snapshots: BTreeMap<(Uuid, String), StoredSnapshot>,
    evaluations: BTreeMap<(Uuid, String), LlmEvaluation>,
    step_trail: HashMap<Uuid, Vec<RunStep>>,
}

impl Tables {
    fn record_step(&mut self, run: &Run) {
        let Some(step) = run.current_step else {
            return;
        };
        let trail = self.step_trail.entry(run.id).or_default();
        if trail.last() != Some(&step) {
            trail.push(step);
        }
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    log_writes_failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every run log append fail until switched back.
    pub fn set_log_writes_failing(&self, failing: bool) {
        self.log_writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Every distinct step a run was saved at, in order.
    pub async fn saved_steps(&self, run_id: Uuid) -> Vec<RunStep> {
        self.tables
            .lock()
            .await
            .step_trail
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn search_results(&self) -> Vec<SearchResultRecord> {
        self.tables.lock().await.search_results.clone()
    }

    pub async fn raw_articles(&self) -> Vec<RawArticle> {
        self.tables.lock().await.raw_articles.clone()
    }

    pub async fn all_events(&self) -> Vec<ExternalEvent> {
        self.tables.lock().await.events.clone()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let mut account = account.clone();
        if let Some(existing) = tables.accounts.get(&account.domain) {
            account.last_enriched_at = account.last_enriched_at.or(existing.last_enriched_at);
            account.last_enrichment_run_id =
                account.last_enrichment_run_id.or(existing.last_enrichment_run_id);
        }
        tables.accounts.insert(account.domain.clone(), account);
        Ok(())
    }

    async fn get_account(&self, domain: &str) -> Result<Option<Account>> {
        Ok(self.tables.lock().await.accounts.get(domain).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.tables.lock().await.accounts.values().cloned().collect())
    }

    async fn mark_account_enriched(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        run_id: Uuid,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(account) = tables.accounts.get_mut(domain) {
            account.last_enriched_at = Some(at);
            account.last_enrichment_run_id = Some(run_id);
        }
        Ok(())
    }

    async fn upsert_telemetry(&self, row: &TelemetryRow) -> Result<()> {
        self.tables
            .lock()
            .await
            .telemetry
            .insert((row.domain.clone(), row.month), row.clone());
        Ok(())
    }

    async fn telemetry_for_domain(&self, domain: &str) -> Result<Vec<TelemetryRow>> {
        Ok(self
            .tables
            .lock()
            .await
            .telemetry
            .values()
            .filter(|row| row.domain == domain)
            .cloned()
            .collect())
    }

    async fn latest_telemetry_month_before(&self, before: NaiveDate) -> Result<Option<NaiveDate>> {
        Ok(self
            .tables
            .lock()
            .await
            .telemetry
            .values()
            .map(|row| row.month)
            .filter(|month| *month < before)
            .max())
    }

    async fn upsert_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        self.tables
            .lock()
            .await
            .opportunities
            .insert(opportunity.opportunity_id.clone(), opportunity.clone());
        Ok(())
    }

    async fn closed_won_opportunities(&self) -> Result<Vec<Opportunity>> {
        Ok(self
            .tables
            .lock()
            .await
            .opportunities
            .values()
            .filter(|o| o.is_closed_won())
            .cloned()
            .collect())
    }

    async fn insert_search_results(&self, rows: &[SearchResultRecord]) -> Result<()> {
        self.tables
            .lock()
            .await
            .search_results
            .extend_from_slice(rows);
        Ok(())
    }

    async fn insert_raw_article(&self, article: &RawArticle) -> Result<()> {
        self.tables.lock().await.raw_articles.push(article.clone());
        Ok(())
    }

    async fn insert_event(&self, event: &ExternalEvent) -> Result<()> {
        self.tables.lock().await.events.push(event.clone());
        Ok(())
    }

    async fn events_for_domain(&self, domain: &str) -> Result<Vec<ExternalEvent>> {
        Ok(self
            .tables
            .lock()
            .await
            .events
            .iter()
            .filter(|e| e.domain == domain)
            .cloned()
            .collect())
    }

    async fn upsert_signal(&self, signal: &AtomicSignal) -> Result<()> {
        self.tables.lock().await.signals.insert(
            (signal.domain.clone(), signal.month, signal.signal_type),
            signal.clone(),
        );
        Ok(())
    }

    async fn signals_for(&self, domain: &str, month: NaiveDate) -> Result<Vec<AtomicSignal>> {
        Ok(self
            .tables
            .lock()
            .await
            .signals
            .values()
            .filter(|s| s.domain == domain && s.month == month)
            .cloned()
            .collect())
    }

    async fn signals_with_version(&self, version: &str) -> Result<Vec<AtomicSignal>> {
        Ok(self
            .tables
            .lock()
            .await
            .signals
            .values()
            .filter(|s| s.signal_version == version)
            .cloned()
            .collect())
    }

    async fn insert_lift_stat(&self, stat: &LiftStat) -> Result<()> {
        self.tables.lock().await.lift_stats.push(stat.clone());
        Ok(())
    }

    async fn lift_stats(&self) -> Result<Vec<LiftStat>> {
        Ok(self.tables.lock().await.lift_stats.clone())
    }

    async fn insert_run(&self, run: &Run) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.runs.contains_key(&run.id) {
            bail!("run {} already exists", run.id);
        }
        tables.record_step(run);
        tables.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.record_step(run);
        tables.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        Ok(self.tables.lock().await.runs.get(&run_id).cloned())
    }

    async fn append_log(&self, draft: &LogDraft) -> Result<RunLogEntry> {
        if self.log_writes_failing.load(Ordering::SeqCst) {
            bail!("run log unavailable");
        }
        let mut tables = self.tables.lock().await;
        let entries = tables.run_log.entry(draft.run_id).or_default();
        let seq = entries.iter().map(|e| e.seq).max().unwrap_or(0) + 1;
        let entry = RunLogEntry {
            run_id: draft.run_id,
            seq,
            ts: Utc::now(),
            level: draft.level,
            domain: draft.domain.clone(),
            step: draft.step,
            message: draft.message.clone(),
            detail: draft.detail.clone(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn logs_since(&self, run_id: Uuid, since: i64, limit: usize) -> Result<Vec<RunLogEntry>> {
        let tables = self.tables.lock().await;
        let mut entries: Vec<_> = tables
            .run_log
            .get(&run_id)
            .map(|entries| entries.iter().filter(|e| e.seq > since).cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|e| e.seq);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn logs_tail(&self, run_id: Uuid, count: usize) -> Result<Vec<RunLogEntry>> {
        let tables = self.tables.lock().await;
        let mut entries = tables.run_log.get(&run_id).cloned().unwrap_or_default();
        entries.sort_by_key(|e| std::cmp::Reverse(e.seq));
        entries.truncate(count);
        Ok(entries)
    }

    async fn get_snapshot(&self, run_id: Uuid, domain: &str) -> Result<Option<StoredSnapshot>> {
        Ok(self
            .tables
            .lock()
            .await
            .snapshots
            .get(&(run_id, domain.to_string()))
            .cloned())
    }

    async fn insert_snapshot(&self, snapshot: &StoredSnapshot) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let key = (snapshot.run_id, snapshot.domain.clone());
        if tables.snapshots.contains_key(&key) {
            bail!(
                "snapshot for run {} domain {} already exists",
                snapshot.run_id,
                snapshot.domain
            );
        }
        tables.snapshots.insert(key, snapshot.clone());
        Ok(())
    }

    async fn snapshots_for_run(&self, run_id: Uuid) -> Result<Vec<StoredSnapshot>> {
        Ok(self
            .tables
            .lock()
            .await
            .snapshots
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn insert_evaluation(&self, evaluation: &LlmEvaluation) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let key = (evaluation.run_id, evaluation.domain.clone());
        if tables.evaluations.contains_key(&key) {
            bail!(
                "evaluation for run {} domain {} already exists",
                evaluation.run_id,
                evaluation.domain
            );
        }
        tables.evaluations.insert(key, evaluation.clone());
        Ok(())
    }

    async fn evaluations_for_run(&self, run_id: Uuid) -> Result<Vec<LlmEvaluation>> {
        Ok(self
            .tables
            .lock()
            .await
            .evaluations
            .values()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn evaluated_domains(&self, run_id: Uuid) -> Result<HashSet<String>> {
        Ok(self
            .tables
            .lock()
            .await
            .evaluations
            .keys()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, domain)| domain.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expansion_core::{LogLevel, RunStep};

    fn draft(run_id: Uuid, message: &str) -> LogDraft {
        LogDraft {
            run_id,
            level: LogLevel::Info,
            domain: None,
            step: Some(RunStep::LlmEval),
            message: message.to_string(),
            detail: None,
        }
    }

    #[tokio::test]
    async fn log_sequences_are_scoped_per_run() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(store.append_log(&draft(a, "one")).await.unwrap().seq, 1);
        assert_eq!(store.append_log(&draft(a, "two")).await.unwrap().seq, 2);
        assert_eq!(store.append_log(&draft(b, "other")).await.unwrap().seq, 1);

        let since = store.logs_since(a, 1, 10).await.unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].message, "two");

        let tail = store.logs_tail(a, 1).await.unwrap();
        assert_eq!(tail[0].seq, 2);
    }

    #[tokio::test]
    async fn signals_upsert_on_domain_month_type() {
        let store = MemoryStore::new();
        let month = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let mut signal = AtomicSignal {
            domain: "acme.com".into(),
            month,
            signal_type: SignalType::SeatSaturation,
            signal_value: 0.5,
            signal_score: 50,
            signal_timestamp: month,
            signal_version: "v1.0".into(),
        };
        store.upsert_signal(&signal).await.unwrap();
        signal.signal_value = 0.8;
        signal.signal_score = 80;
        store.upsert_signal(&signal).await.unwrap();

        let stored = store.signals_for("acme.com", month).await.unwrap();
        assert_eq!(stored, vec![signal]);
    }

    #[tokio::test]
    async fn account_reingest_keeps_enrichment_markers() {
        let store = MemoryStore::new();
        let account = Account {
            account_id: "001".into(),
            domain: "acme.com".into(),
            account_name: "Acme".into(),
            website: None,
            arr: Some(1000.0),
            renewal_date: None,
            segment: None,
            status: None,
            licensed_seats: None,
            extra: Default::default(),
            last_enriched_at: None,
            last_enrichment_run_id: None,
        };
        store.upsert_account(&account).await.unwrap();
        let run_id = Uuid::new_v4();
        store
            .mark_account_enriched("acme.com", Utc::now(), run_id)
            .await
            .unwrap();
        store.upsert_account(&account).await.unwrap();

        let stored = store.get_account("acme.com").await.unwrap().unwrap();
        assert_eq!(stored.last_enrichment_run_id, Some(run_id));
    }
}
