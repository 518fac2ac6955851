use std::collections::HashMap;

use chrono::{Months, NaiveDate};
use expansion_core::{Account, ExternalEvent, LlmEvaluation, Motion, StoredSnapshot};
use expansion_storage::EngineStore;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

pub const HIGH_ARR_THRESHOLD: f64 = 50_000.0;
pub const EXPANSION_SCORE_THRESHOLD: f64 = 70.0;
/// Executive events this recent rule out a LinkedIn review.
pub const EXEC_EVENT_LOOKBACK_MONTHS: u32 = 12;

pub const CSV_HEADER: [&str; 13] = [
    "account_name",
    "domain",
    "arr",
    "renewal_date",
    "expansion_score",
    "risk_score",
    "impact_score",
    "recommended_motion",
    "why_now",
    "reasoning",
    "evidence_used",
    "data_quality_score",
    "linkedin_review_recommended",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub account_name: String,
    pub domain: String,
    pub arr: Option<f64>,
    pub renewal_date: Option<NaiveDate>,
    pub expansion_score: f64,
    pub risk_score: f64,
    pub impact_score: f64,
    pub recommended_motion: Motion,
    pub why_now: String,
    pub reasoning: String,
    /// Evidence list serialized as JSON.
    pub evidence_used: String,
    pub data_quality_score: Option<i32>,
    pub linkedin_review_recommended: bool,
}

pub fn impact_score(expansion_score: f64, arr: Option<f64>) -> f64 {
    expansion_score * (arr.unwrap_or(0.0) + 1.0).ln()
}

pub fn export_filename(evaluation_month: NaiveDate) -> String {
    format!(
        "expansion_signal_report_{}.csv",
        evaluation_month.format("%Y-%m-%d")
    )
}

fn has_recent_exec_event(events: &[ExternalEvent], month: NaiveDate) -> bool {
    let from = month
        .checked_sub_months(Months::new(EXEC_EVENT_LOOKBACK_MONTHS))
        .unwrap_or(month);
    events.iter().any(|e| {
        e.typed().map(|t| t.is_executive()).unwrap_or(false)
            && e.event_date().map(|d| d >= from && d <= month).unwrap_or(false)
    })
}

pub fn build_row(
    evaluation: &LlmEvaluation,
    account: Option<&Account>,
    snapshot: Option<&StoredSnapshot>,
    events: &[ExternalEvent],
    month: NaiveDate,
) -> EngineResult<ExportRow> {
    let arr = account.and_then(|a| a.arr);
    let recommended = !has_recent_exec_event(events, month)
        && arr.unwrap_or(0.0) >= HIGH_ARR_THRESHOLD
        && evaluation.expansion_score >= EXPANSION_SCORE_THRESHOLD;

    Ok(ExportRow {
        account_name: account.map(|a| a.account_name.clone()).unwrap_or_default(),
        domain: evaluation.domain.clone(),
        arr,
        renewal_date: account.and_then(|a| a.renewal_date),
        expansion_score: evaluation.expansion_score,
        risk_score: evaluation.risk_score,
        impact_score: impact_score(evaluation.expansion_score, arr),
        recommended_motion: evaluation.recommended_motion,
        why_now: evaluation.why_now.clone(),
        reasoning: evaluation.reasoning.clone(),
        evidence_used: serde_json::to_string(&evaluation.evidence_used)
            .map_err(anyhow::Error::from)?,
        data_quality_score: snapshot.map(|s| s.data_quality_score),
        linkedin_review_recommended: recommended,
    })
}

/// EXPAND before MONITOR before SAVE, then impact and expansion score, both descending.
pub fn rank_rows(rows: &mut [ExportRow]) {
    rows.sort_by(|a, b| {
        a.recommended_motion
            .rank()
            .cmp(&b.recommended_motion.rank())
            .then_with(|| b.impact_score.total_cmp(&a.impact_score))
            .then_with(|| b.expansion_score.total_cmp(&a.expansion_score))
    });
}

/// Ranked rows for every evaluation stored under `run_id`.
pub async fn export_rows(store: &dyn EngineStore, run_id: Uuid) -> EngineResult<Vec<ExportRow>> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or(EngineError::RunNotFound(run_id))?;
    let evaluations = store.evaluations_for_run(run_id).await?;
    if evaluations.is_empty() {
        return Ok(Vec::new());
    }

    let snapshots: HashMap<String, StoredSnapshot> = store
        .snapshots_for_run(run_id)
        .await?
        .into_iter()
        .map(|s| (s.domain.clone(), s))
        .collect();

    let mut rows = Vec::with_capacity(evaluations.len());
    for evaluation in &evaluations {
        let account = store.get_account(&evaluation.domain).await?;
        let events = store.events_for_domain(&evaluation.domain).await?;
        rows.push(build_row(
            evaluation,
            account.as_ref(),
            snapshots.get(&evaluation.domain),
            &events,
            run.evaluation_month,
        )?);
    }
    rank_rows(&mut rows);
    Ok(rows)
}

/// Quotes a field holding a comma, quote or newline; inner quotes are doubled.
pub fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn to_csv(rows: &[ExportRow]) -> String {
    let mut lines = vec![CSV_HEADER.join(",")];
    for row in rows {
        let fields = [
            row.account_name.clone(),
            row.domain.clone(),
            opt(row.arr),
            opt(row.renewal_date),
            row.expansion_score.to_string(),
            row.risk_score.to_string(),
            row.impact_score.to_string(),
            row.recommended_motion.to_string(),
            row.why_now.clone(),
            row.reasoning.clone(),
            row.evidence_used.clone(),
            opt(row.data_quality_score),
            row.linkedin_review_recommended.to_string(),
        ];
        lines.push(
            fields
                .iter()
                .map(|f| csv_escape(f))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n")
}
