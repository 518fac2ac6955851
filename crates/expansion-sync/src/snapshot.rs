use chrono::{NaiveDate, Utc};
use expansion_core::{
    Account, AccountProfile, ContextSnapshot, EvaluationContext, ExternalEvent,
    HistoricalSignalStat, LiftStat, SnapshotSignal, StoredSnapshot, TelemetryRow,
};
use expansion_storage::EngineStore;
use uuid::Uuid;

use crate::error::EngineResult;

const MISSING_SEATS_PENALTY: i32 = 20;
const THIN_TELEMETRY_PENALTY: i32 = 15;
const NO_LIFT_PENALTY: i32 = 15;
const LOW_CONFIDENCE_PENALTY: i32 = 10;
const MIN_TELEMETRY_MONTHS: usize = 2;
const MIN_AVERAGE_CONFIDENCE: f64 = 0.7;

/// 100 minus penalties for missing seat counts, thin telemetry, no lift
/// history and low-confidence events, clamped to 0..=100.
pub fn data_quality_score(
    account: &Account,
    telemetry: &[TelemetryRow],
    events: &[ExternalEvent],
    has_lift_stats: bool,
) -> i32 {
    let mut score = 100;

    let has_seats =
        account.licensed_seats.is_some() || telemetry.iter().any(|t| t.licensed_seats.is_some());
    if !has_seats {
        score -= MISSING_SEATS_PENALTY;
    }
    if telemetry.len() < MIN_TELEMETRY_MONTHS {
        score -= THIN_TELEMETRY_PENALTY;
    }
    if !has_lift_stats {
        score -= NO_LIFT_PENALTY;
    }

    let confidences: Vec<f64> = events.iter().filter_map(|e| e.confidence).collect();
    let average = if confidences.is_empty() {
        1.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };
    if average < MIN_AVERAGE_CONFIDENCE {
        score -= LOW_CONFIDENCE_PENALTY;
    }

    score.clamp(0, 100)
}

pub async fn build_context_snapshot(
    store: &dyn EngineStore,
    account: &Account,
    month: NaiveDate,
) -> EngineResult<ContextSnapshot> {
    let telemetry = store.telemetry_for_domain(&account.domain).await?;
    let events = store.events_for_domain(&account.domain).await?;
    let lift: Vec<LiftStat> = store.lift_stats().await?;
    let mut signals = store.signals_for(&account.domain, month).await?;
    signals.sort_by_key(|s| s.signal_type);

    Ok(ContextSnapshot {
        evaluation_context: EvaluationContext {
            evaluation_month: month,
            data_quality_score: data_quality_score(account, &telemetry, &events, !lift.is_empty()),
        },
        account_profile: AccountProfile {
            account_name: account.account_name.clone(),
            domain: account.domain.clone(),
            arr: account.arr,
            renewal_date: account.renewal_date,
            segment: account.segment.clone(),
        },
        atomic_signals: signals
            .iter()
            .map(|s| SnapshotSignal {
                signal_type: s.signal_type,
                signal_category: s.signal_type.category(),
                signal_value: s.signal_value,
                signal_score: s.signal_score,
                signal_timestamp: s.signal_timestamp,
            })
            .collect(),
        historical_signal_stats: lift.iter().map(HistoricalSignalStat::from).collect(),
    })
}

/// The stored snapshot for (run, domain), building and storing it first
/// when there is none.
pub async fn snapshot_for_run(
    store: &dyn EngineStore,
    run_id: Uuid,
    account: &Account,
    month: NaiveDate,
) -> EngineResult<StoredSnapshot> {
    if let Some(existing) = store.get_snapshot(run_id, &account.domain).await? {
        return Ok(existing);
    }
    let context = build_context_snapshot(store, account, month).await?;
    let snapshot = StoredSnapshot {
        run_id,
        domain: account.domain.clone(),
        evaluation_month: month,
        data_quality_score: context.evaluation_context.data_quality_score,
        context,
        created_at: Utc::now(),
    };
    store.insert_snapshot(&snapshot).await?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use expansion_core::EventPayload;

    fn account(seats: Option<i64>) -> Account {
        Account {
            account_id: "A1".into(),
            domain: "acme.com".into(),
            account_name: "Acme".into(),
            website: None,
            arr: Some(100_000.0),
            renewal_date: None,
            segment: None,
            status: None,
            licensed_seats: seats,
            extra: Default::default(),
            last_enriched_at: None,
            last_enrichment_run_id: None,
        }
    }

    fn row(month: u32) -> TelemetryRow {
        TelemetryRow {
            domain: "acme.com".into(),
            month: NaiveDate::from_ymd_opt(2025, month, 1).unwrap(),
            active_users: Some(40),
            licensed_seats: Some(50),
            feature_adoption_score: Some(0.9),
        }
    }

    fn event(confidence: Option<f64>) -> ExternalEvent {
        ExternalEvent {
            id: Uuid::new_v4(),
            domain: "acme.com".into(),
            event_type: "LAYOFF".into(),
            event_ts: None,
            source: None,
            source_url: None,
            confidence,
            payload: EventPayload::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn full_data_scores_one_hundred() {
        assert_eq!(data_quality_score(&account(None), &[row(4), row(5)], &[], true), 100);
    }

    #[test]
    fn penalties_accumulate() {
        assert_eq!(data_quality_score(&account(None), &[], &[], false), 50);
        let events = vec![event(Some(0.6)), event(Some(0.7)), event(None)];
        assert_eq!(
            data_quality_score(&account(Some(10)), &[row(5)], &events, true),
            75
        );
    }
}
