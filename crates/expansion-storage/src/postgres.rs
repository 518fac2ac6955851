use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use expansion_core::{
    Account, AtomicSignal, ExternalEvent, LiftStat, LlmEvaluation, LogDraft, Opportunity,
    RawArticle, Run, RunConfig, RunLogEntry, SearchResultRecord, StoredSnapshot, TelemetryRow,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::EngineStore;

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running migrations")
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let extra: Json<serde_json::Map<String, serde_json::Value>> = row.try_get("extra")?;
    Ok(Account {
        account_id: row.try_get("account_id")?,
        domain: row.try_get("domain")?,
        account_name: row.try_get("account_name")?,
        website: row.try_get("website")?,
        arr: row.try_get("arr")?,
        renewal_date: row.try_get("renewal_date")?,
        segment: row.try_get("segment")?,
        status: row.try_get("status")?,
        licensed_seats: row.try_get("licensed_seats")?,
        extra: extra.0,
        last_enriched_at: row.try_get("last_enriched_at")?,
        last_enrichment_run_id: row.try_get("last_enrichment_run_id")?,
    })
}

fn telemetry_from_row(row: &PgRow) -> Result<TelemetryRow> {
    Ok(TelemetryRow {
        domain: row.try_get("domain")?,
        month: row.try_get("month")?,
        active_users: row.try_get("active_users")?,
        licensed_seats: row.try_get("licensed_seats")?,
        feature_adoption_score: row.try_get("feature_adoption_score")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<ExternalEvent> {
    let payload: Json<expansion_core::EventPayload> = row.try_get("payload_json")?;
    Ok(ExternalEvent {
        id: row.try_get("id")?,
        domain: row.try_get("domain")?,
        event_type: row.try_get("event_type")?,
        event_ts: row.try_get("event_ts")?,
        source: row.try_get("source")?,
        source_url: row.try_get("source_url")?,
        confidence: row.try_get("confidence")?,
        payload: payload.0,
        created_at: row.try_get("created_at")?,
    })
}

fn signal_from_row(row: &PgRow) -> Result<AtomicSignal> {
    let signal_type: String = row.try_get("signal_type")?;
    Ok(AtomicSignal {
        domain: row.try_get("domain")?,
        month: row.try_get("month")?,
        signal_type: signal_type.parse()?,
        signal_value: row.try_get("signal_value")?,
        signal_score: row.try_get("signal_score")?,
        signal_timestamp: row.try_get("signal_timestamp")?,
        signal_version: row.try_get("signal_version")?,
    })
}

fn lift_from_row(row: &PgRow) -> Result<LiftStat> {
    let signal_type: String = row.try_get("signal_type")?;
    Ok(LiftStat {
        id: row.try_get("id")?,
        signal_type: signal_type.parse()?,
        expansion_rate: row.try_get("expansion_rate")?,
        non_expansion_rate: row.try_get("non_expansion_rate")?,
        lift_ratio: row.try_get("lift_ratio")?,
        sample_size: row.try_get("sample_size")?,
        lift_stats_version: row.try_get("lift_stats_version")?,
        computed_at: row.try_get("computed_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<Run> {
    let status: String = row.try_get("status")?;
    let current_step: Option<String> = row.try_get("current_step")?;
    let config: Json<RunConfig> = row.try_get("config")?;
    let last_processed_index: Option<i64> = row.try_get("last_processed_index")?;
    Ok(Run {
        id: row.try_get("id")?,
        evaluation_month: row.try_get("evaluation_month")?,
        prompt_version: row.try_get("prompt_version")?,
        signal_version: row.try_get("signal_version")?,
        lift_stats_version: row.try_get("lift_stats_version")?,
        engine_version: row.try_get("engine_version")?,
        status: status.parse()?,
        processed_count: to_usize(row.try_get("processed_count")?),
        total_customers: to_usize(row.try_get("total_customers")?),
        last_processed_index: last_processed_index.map(to_usize),
        current_step: current_step.map(|s| s.parse()).transpose()?,
        current_domain: row.try_get("current_domain")?,
        substep_label: row.try_get("substep_label")?,
        config: config.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn log_from_row(row: &PgRow) -> Result<RunLogEntry> {
    let level: String = row.try_get("level")?;
    let step: Option<String> = row.try_get("step")?;
    Ok(RunLogEntry {
        run_id: row.try_get("run_id")?,
        seq: row.try_get("seq")?,
        ts: row.try_get("ts")?,
        level: level.parse()?,
        domain: row.try_get("domain")?,
        step: step.map(|s| s.parse()).transpose()?,
        message: row.try_get("message")?,
        detail: row.try_get("detail")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<StoredSnapshot> {
    let context: Json<expansion_core::ContextSnapshot> = row.try_get("context_json")?;
    Ok(StoredSnapshot {
        run_id: row.try_get("run_id")?,
        domain: row.try_get("domain")?,
        evaluation_month: row.try_get("evaluation_month")?,
        data_quality_score: row.try_get("data_quality_score")?,
        context: context.0,
        created_at: row.try_get("created_at")?,
    })
}

fn evaluation_from_row(row: &PgRow) -> Result<LlmEvaluation> {
    let motion: String = row.try_get("recommended_motion")?;
    let evidence: Json<Vec<expansion_core::Evidence>> = row.try_get("evidence_used")?;
    Ok(LlmEvaluation {
        run_id: row.try_get("run_id")?,
        domain: row.try_get("domain")?,
        prompt_version: row.try_get("prompt_version")?,
        signal_version: row.try_get("signal_version")?,
        lift_stats_version: row.try_get("lift_stats_version")?,
        engine_version: row.try_get("engine_version")?,
        model_name: row.try_get("model_name")?,
        expansion_score: row.try_get("expansion_score")?,
        risk_score: row.try_get("risk_score")?,
        recommended_motion: motion.parse()?,
        why_now: row.try_get("why_now")?,
        reasoning: row.try_get("reasoning")?,
        evidence_used: evidence.0,
        raw_response: row.try_get("raw_response")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl EngineStore for PgStore {
    async fn upsert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (domain, account_id, account_name, website, arr, renewal_date,
                                  segment, status, licensed_seats, extra)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (domain) DO UPDATE
               SET account_id = EXCLUDED.account_id,
                   account_name = EXCLUDED.account_name,
                   website = EXCLUDED.website,
                   arr = EXCLUDED.arr,
                   renewal_date = EXCLUDED.renewal_date,
                   segment = EXCLUDED.segment,
                   status = EXCLUDED.status,
                   licensed_seats = EXCLUDED.licensed_seats,
                   extra = EXCLUDED.extra
            "#,
        )
        .bind(&account.domain)
        .bind(&account.account_id)
        .bind(&account.account_name)
        .bind(&account.website)
        .bind(account.arr)
        .bind(account.renewal_date)
        .bind(&account.segment)
        .bind(&account.status)
        .bind(account.licensed_seats)
        .bind(Json(&account.extra))
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting account {}", account.domain))?;
        Ok(())
    }

    async fn get_account(&self, domain: &str) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE domain = $1")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY domain")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn mark_account_enriched(
        &self,
        domain: &str,
        at: DateTime<Utc>,
        run_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET last_enriched_at = $2, last_enrichment_run_id = $3 WHERE domain = $1",
        )
        .bind(domain)
        .bind(at)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_telemetry(&self, row: &TelemetryRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO telemetry (domain, month, active_users, licensed_seats, feature_adoption_score)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (domain, month) DO UPDATE
               SET active_users = EXCLUDED.active_users,
                   licensed_seats = EXCLUDED.licensed_seats,
                   feature_adoption_score = EXCLUDED.feature_adoption_score
            "#,
        )
        .bind(&row.domain)
        .bind(row.month)
        .bind(row.active_users)
        .bind(row.licensed_seats)
        .bind(row.feature_adoption_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn telemetry_for_domain(&self, domain: &str) -> Result<Vec<TelemetryRow>> {
        let rows = sqlx::query("SELECT * FROM telemetry WHERE domain = $1 ORDER BY month")
            .bind(domain)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(telemetry_from_row).collect()
    }

    async fn latest_telemetry_month_before(&self, before: NaiveDate) -> Result<Option<NaiveDate>> {
        let month: Option<NaiveDate> =
            sqlx::query_scalar("SELECT MAX(month) FROM telemetry WHERE month < $1")
                .bind(before)
                .fetch_one(&self.pool)
                .await?;
        Ok(month)
    }

    async fn upsert_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO opportunities (opportunity_id, account_id, stage, opportunity_type, amount, close_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (opportunity_id) DO UPDATE
               SET account_id = EXCLUDED.account_id,
                   stage = EXCLUDED.stage,
                   opportunity_type = EXCLUDED.opportunity_type,
                   amount = EXCLUDED.amount,
                   close_date = EXCLUDED.close_date
            "#,
        )
        .bind(&opportunity.opportunity_id)
        .bind(&opportunity.account_id)
        .bind(&opportunity.stage)
        .bind(&opportunity.opportunity_type)
        .bind(opportunity.amount)
        .bind(opportunity.close_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn closed_won_opportunities(&self) -> Result<Vec<Opportunity>> {
        let rows = sqlx::query("SELECT * FROM opportunities WHERE stage = $1 ORDER BY opportunity_id")
            .bind(expansion_core::STAGE_CLOSED_WON)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Opportunity {
                    opportunity_id: row.try_get("opportunity_id")?,
                    account_id: row.try_get("account_id")?,
                    stage: row.try_get("stage")?,
                    opportunity_type: row.try_get("opportunity_type")?,
                    amount: row.try_get("amount")?,
                    close_date: row.try_get("close_date")?,
                })
            })
            .collect()
    }

    async fn insert_search_results(&self, rows: &[SearchResultRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO external_search_results (domain, query, category, url, title, snippet, searched_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&row.domain)
            .bind(&row.query)
            .bind(row.category.as_str())
            .bind(&row.url)
            .bind(&row.title)
            .bind(&row.snippet)
            .bind(row.searched_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_raw_article(&self, article: &RawArticle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO external_articles_raw (domain, url, article_text, published_date, content_hash, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&article.domain)
        .bind(&article.url)
        .bind(&article.article_text)
        .bind(article.published_date)
        .bind(&article.content_hash)
        .bind(article.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_event(&self, event: &ExternalEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO external_events (id, domain, event_type, event_ts, source, source_url,
                                         confidence, payload_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(&event.domain)
        .bind(&event.event_type)
        .bind(event.event_ts)
        .bind(&event.source)
        .bind(&event.source_url)
        .bind(event.confidence)
        .bind(Json(&event.payload))
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events_for_domain(&self, domain: &str) -> Result<Vec<ExternalEvent>> {
        let rows = sqlx::query("SELECT * FROM external_events WHERE domain = $1 ORDER BY created_at")
            .bind(domain)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn upsert_signal(&self, signal: &AtomicSignal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO atomic_signals (domain, month, signal_type, signal_value, signal_score,
                                        signal_timestamp, signal_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (domain, month, signal_type) DO UPDATE
               SET signal_value = EXCLUDED.signal_value,
                   signal_score = EXCLUDED.signal_score,
                   signal_timestamp = EXCLUDED.signal_timestamp
            "#,
        )
        .bind(&signal.domain)
        .bind(signal.month)
        .bind(signal.signal_type.as_str())
        .bind(signal.signal_value)
        .bind(signal.signal_score)
        .bind(signal.signal_timestamp)
        .bind(&signal.signal_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn signals_for(&self, domain: &str, month: NaiveDate) -> Result<Vec<AtomicSignal>> {
        let rows = sqlx::query(
            "SELECT * FROM atomic_signals WHERE domain = $1 AND month = $2 ORDER BY signal_type",
        )
        .bind(domain)
        .bind(month)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(signal_from_row).collect()
    }

    async fn signals_with_version(&self, version: &str) -> Result<Vec<AtomicSignal>> {
        let rows = sqlx::query("SELECT * FROM atomic_signals WHERE signal_version = $1")
            .bind(version)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(signal_from_row).collect()
    }

    async fn insert_lift_stat(&self, stat: &LiftStat) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lift_stats (id, signal_type, expansion_rate, non_expansion_rate, lift_ratio,
                                    sample_size, lift_stats_version, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(stat.id)
        .bind(stat.signal_type.as_str())
        .bind(stat.expansion_rate)
        .bind(stat.non_expansion_rate)
        .bind(stat.lift_ratio)
        .bind(stat.sample_size)
        .bind(&stat.lift_stats_version)
        .bind(stat.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lift_stats(&self) -> Result<Vec<LiftStat>> {
        let rows = sqlx::query("SELECT * FROM lift_stats ORDER BY computed_at, signal_type")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(lift_from_row).collect()
    }

    async fn insert_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, evaluation_month, prompt_version, signal_version, lift_stats_version,
                              engine_version, status, processed_count, total_customers,
                              last_processed_index, current_step, current_domain, substep_label,
                              config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(run.id)
        .bind(run.evaluation_month)
        .bind(&run.prompt_version)
        .bind(&run.signal_version)
        .bind(&run.lift_stats_version)
        .bind(&run.engine_version)
        .bind(run.status.as_str())
        .bind(to_i64(run.processed_count))
        .bind(to_i64(run.total_customers))
        .bind(run.last_processed_index.map(to_i64))
        .bind(run.current_step.map(|s| s.as_str()))
        .bind(&run.current_domain)
        .bind(&run.substep_label)
        .bind(Json(&run.config))
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("inserting run {}", run.id))?;
        Ok(())
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runs
               SET status = $2,
                   processed_count = $3,
                   total_customers = $4,
                   last_processed_index = $5,
                   current_step = $6,
                   current_domain = $7,
                   substep_label = $8,
                   config = $9,
                   updated_at = $10
             WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(to_i64(run.processed_count))
        .bind(to_i64(run.total_customers))
        .bind(run.last_processed_index.map(to_i64))
        .bind(run.current_step.map(|s| s.as_str()))
        .bind(&run.current_domain)
        .bind(&run.substep_label)
        .bind(Json(&run.config))
        .bind(run.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving run {}", run.id))?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn append_log(&self, draft: &LogDraft) -> Result<RunLogEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO run_log (run_id, seq, ts, level, domain, step, message, detail)
            SELECT $1, COALESCE(MAX(seq), 0) + 1, $2, $3, $4, $5, $6, $7
              FROM run_log
             WHERE run_id = $1
            RETURNING *
            "#,
        )
        .bind(draft.run_id)
        .bind(Utc::now())
        .bind(draft.level.as_str())
        .bind(&draft.domain)
        .bind(draft.step.map(|s| s.as_str()))
        .bind(&draft.message)
        .bind(&draft.detail)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("appending run log for {}", draft.run_id))?;
        log_from_row(&row)
    }

    async fn logs_since(&self, run_id: Uuid, since: i64, limit: usize) -> Result<Vec<RunLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM run_log WHERE run_id = $1 AND seq > $2 ORDER BY seq ASC LIMIT $3",
        )
        .bind(run_id)
        .bind(since)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn logs_tail(&self, run_id: Uuid, count: usize) -> Result<Vec<RunLogEntry>> {
        let rows = sqlx::query("SELECT * FROM run_log WHERE run_id = $1 ORDER BY seq DESC LIMIT $2")
            .bind(run_id)
            .bind(to_i64(count))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn get_snapshot(&self, run_id: Uuid, domain: &str) -> Result<Option<StoredSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM account_context_snapshots WHERE run_id = $1 AND domain = $2",
        )
        .bind(run_id)
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn insert_snapshot(&self, snapshot: &StoredSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_context_snapshots (run_id, domain, evaluation_month,
                                                   data_quality_score, context_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(snapshot.run_id)
        .bind(&snapshot.domain)
        .bind(snapshot.evaluation_month)
        .bind(snapshot.data_quality_score)
        .bind(Json(&snapshot.context))
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn snapshots_for_run(&self, run_id: Uuid) -> Result<Vec<StoredSnapshot>> {
        let rows = sqlx::query("SELECT * FROM account_context_snapshots WHERE run_id = $1")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn insert_evaluation(&self, evaluation: &LlmEvaluation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_evaluations (run_id, domain, prompt_version, signal_version,
                                         lift_stats_version, engine_version, model_name,
                                         expansion_score, risk_score, recommended_motion, why_now,
                                         reasoning, evidence_used, raw_response, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(evaluation.run_id)
        .bind(&evaluation.domain)
        .bind(&evaluation.prompt_version)
        .bind(&evaluation.signal_version)
        .bind(&evaluation.lift_stats_version)
        .bind(&evaluation.engine_version)
        .bind(&evaluation.model_name)
        .bind(evaluation.expansion_score)
        .bind(evaluation.risk_score)
        .bind(evaluation.recommended_motion.as_str())
        .bind(&evaluation.why_now)
        .bind(&evaluation.reasoning)
        .bind(Json(&evaluation.evidence_used))
        .bind(&evaluation.raw_response)
        .bind(evaluation.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "inserting evaluation for run {} domain {}",
                evaluation.run_id, evaluation.domain
            )
        })?;
        Ok(())
    }

    async fn evaluations_for_run(&self, run_id: Uuid) -> Result<Vec<LlmEvaluation>> {
        let rows = sqlx::query("SELECT * FROM llm_evaluations WHERE run_id = $1")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(evaluation_from_row).collect()
    }

    async fn evaluated_domains(&self, run_id: Uuid) -> Result<HashSet<String>> {
        let domains: Vec<String> =
            sqlx::query_scalar("SELECT domain FROM llm_evaluations WHERE run_id = $1")
                .bind(run_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(domains.into_iter().collect())
    }
}
