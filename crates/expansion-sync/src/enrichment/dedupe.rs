use chrono::{Duration, Utc};
use expansion_core::{ExternalEvent, RunStep};
use serde_json::json;
use strsim::jaro_winkler;

use super::extract::CandidateEvent;
use super::Stage;
use crate::error::EngineResult;
use crate::run_log::LogFields;

pub const DEDUPE_WINDOW_DAYS: i64 = 3;
/// Both summaries must be at least this long for the substring rule.
pub const MIN_SUBSTRING_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    ExactSummary,
    SubstringSummary,
    TimeWindow,
}

impl DuplicateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateReason::ExactSummary => "exact_summary",
            DuplicateReason::SubstringSummary => "substring_summary",
            DuplicateReason::TimeWindow => "time_window",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub reason: DuplicateReason,
    /// Best Jaro-Winkler score of the normalized summaries in the window.
    pub similarity: f64,
}

pub fn normalize_summary(input: &str) -> String {
    input
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn summaries_match(a: &str, b: &str) -> Option<DuplicateReason> {
    if a == b {
        return Some(DuplicateReason::ExactSummary);
    }
    let long_enough = a.len() >= MIN_SUBSTRING_LEN && b.len() >= MIN_SUBSTRING_LEN;
    if long_enough && (a.contains(b) || b.contains(a)) {
        return Some(DuplicateReason::SubstringSummary);
    }
    None
}

/// Decides whether `candidate` duplicates one of `existing`.
///
/// Dated candidates collide with any same-type event within
/// ±[`DEDUPE_WINDOW_DAYS`] even when the summaries differ. Undated
/// candidates only match undated same-type events by summary.
pub fn find_duplicate(candidate: &CandidateEvent, existing: &[ExternalEvent]) -> Option<DuplicateMatch> {
    let event_type = candidate.event_type.as_str();
    let candidate_date = candidate.event_ts.map(|ts| ts.date_naive());
    let window = Duration::days(DEDUPE_WINDOW_DAYS);

    let neighbours: Vec<&ExternalEvent> = existing
        .iter()
        .filter(|e| e.domain == candidate.domain && e.event_type == event_type)
        .filter(|e| match (candidate_date, e.event_date()) {
            (Some(date), Some(other)) => other >= date - window && other <= date + window,
            (None, None) => true,
            _ => false,
        })
        .collect();
    if neighbours.is_empty() {
        return None;
    }

    let summary = normalize_summary(&candidate.summary);
    let mut similarity = 0.0_f64;
    for event in &neighbours {
        let other = normalize_summary(&event.payload.summary);
        if let Some(reason) = summaries_match(&summary, &other) {
            return Some(DuplicateMatch {
                reason,
                similarity: jaro_winkler(&summary, &other),
            });
        }
        similarity = similarity.max(jaro_winkler(&summary, &other));
    }

    candidate_date.map(|_| DuplicateMatch {
        reason: DuplicateReason::TimeWindow,
        similarity,
    })
}

/// Inserts candidates that survive dedupe against stored events and earlier
/// candidates of the same batch. Returns the number inserted.
pub(crate) async fn dedupe_and_store(
    stage: &Stage<'_>,
    domain: &str,
    candidates: Vec<CandidateEvent>,
) -> EngineResult<usize> {
    if candidates.is_empty() {
        return Ok(0);
    }
    let mut existing = stage.store.events_for_domain(domain).await?;
    let mut inserted = 0;

    for candidate in candidates {
        let fields = LogFields::step(RunStep::ExternalEventsDedupeStore).domain(&candidate.domain);
        if let Some(dup) = find_duplicate(&candidate, &existing) {
            stage
                .log
                .info(
                    stage.run_id,
                    "Dedupe skip",
                    fields.detail(json!({
                        "event_type": candidate.event_type.as_str(),
                        "event_ts": candidate.raw_ts,
                        "reason": dup.reason.as_str(),
                        "similarity": (dup.similarity * 1000.0).round() / 1000.0,
                    })),
                )
                .await;
            continue;
        }

        let event_ts = candidate.raw_ts.clone();
        let event = candidate.into_event(Utc::now());
        stage.store.insert_event(&event).await?;
        stage
            .log
            .info(
                stage.run_id,
                "Dedupe insert",
                fields.detail(json!({
                    "event_type": event.event_type,
                    "event_ts": event_ts,
                })),
            )
            .await;
        existing.push(event);
        inserted += 1;
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use expansion_core::{EventPayload, EventType};
    use uuid::Uuid;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().unwrap()
    }

    fn mk_candidate(event_type: EventType, at: Option<DateTime<Utc>>, summary: &str) -> CandidateEvent {
        CandidateEvent {
            domain: "acme.com".into(),
            event_type,
            raw_ts: at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "unknown".into()),
            event_ts: at,
            source: None,
            source_url: None,
            confidence: 0.9,
            summary: summary.into(),
        }
    }

    fn mk_event(event_type: EventType, at: Option<DateTime<Utc>>, summary: &str) -> ExternalEvent {
        ExternalEvent {
            id: Uuid::new_v4(),
            domain: "acme.com".into(),
            event_type: event_type.as_str().into(),
            event_ts: at,
            source: None,
            source_url: None,
            confidence: Some(0.9),
            payload: EventPayload {
                summary: summary.into(),
                ..EventPayload::default()
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn exact_summary_inside_window_is_duplicate() {
        let stored = vec![mk_event(EventType::Layoff, Some(ts(2025, 4, 1)), "Acme cuts 5% of staff")];
        let dup = find_duplicate(
            &mk_candidate(EventType::Layoff, Some(ts(2025, 4, 3)), "ACME cuts 5% of staff!"),
            &stored,
        )
        .unwrap();
        assert_eq!(dup.reason, DuplicateReason::ExactSummary);
        assert!((dup.similarity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn substring_rule_needs_twenty_characters() {
        let stored = vec![mk_event(
            EventType::Layoff,
            Some(ts(2025, 4, 1)),
            "Acme announces layoffs across its sales division",
        )];
        let dup = find_duplicate(
            &mk_candidate(EventType::Layoff, Some(ts(2025, 4, 1)), "acme announces layoffs across"),
            &stored,
        )
        .unwrap();
        assert_eq!(dup.reason, DuplicateReason::SubstringSummary);
    }

    #[test]
    fn dissimilar_summary_in_window_still_collides() {
        let stored = vec![mk_event(EventType::Layoff, Some(ts(2025, 4, 1)), "Acme cuts 5% of staff")];
        let dup = find_duplicate(
            &mk_candidate(EventType::Layoff, Some(ts(2025, 4, 4)), "Acme closes Denver office"),
            &stored,
        )
        .unwrap();
        assert_eq!(dup.reason, DuplicateReason::TimeWindow);
        assert!(dup.similarity < 1.0);
    }

    #[test]
    fn outside_window_or_other_type_is_new() {
        let stored = vec![
            mk_event(EventType::Layoff, Some(ts(2025, 4, 1)), "Acme cuts 5% of staff"),
            mk_event(EventType::ExecHireLd, Some(ts(2025, 4, 10)), "Acme cuts 5% of staff"),
        ];
        assert!(find_duplicate(
            &mk_candidate(EventType::Layoff, Some(ts(2025, 4, 5)), "Acme cuts 5% of staff"),
            &stored
        )
        .is_none());
    }

    #[test]
    fn undated_candidates_only_match_undated_summaries() {
        let stored = vec![
            mk_event(EventType::Layoff, Some(ts(2025, 4, 1)), "Acme cuts 5% of staff"),
            mk_event(EventType::Layoff, None, "Acme trims its workforce"),
        ];
        assert!(find_duplicate(&mk_candidate(EventType::Layoff, None, "Acme cuts 5% of staff"), &stored).is_none());
        let dup = find_duplicate(&mk_candidate(EventType::Layoff, None, "acme trims its workforce"), &stored).unwrap();
        assert_eq!(dup.reason, DuplicateReason::ExactSummary);
    }

    #[test]
    fn normalization_matches_key_fragments() {
        assert_eq!(normalize_summary("  Acme -- Hires   a CLO! "), "acme hires a clo");
    }

    #[tokio::test]
    async fn repeated_and_near_events_store_one_row() {
        use std::sync::Arc;

        use expansion_storage::{EngineStore, MemoryStore};

        use crate::run_log::{LogQuery, RunLog};

        let store = Arc::new(MemoryStore::new());
        let log = RunLog::new(store.clone());
        let stage = Stage {
            store: store.as_ref(),
            log: &log,
            run_id: Uuid::new_v4(),
        };
        let summary = "Acme lays off 200 employees in restructuring";

        let first = vec![mk_candidate(EventType::Layoff, Some(ts(2025, 4, 10)), summary)];
        assert_eq!(dedupe_and_store(&stage, "acme.com", first).await.unwrap(), 1);

        let again = vec![
            mk_candidate(EventType::Layoff, Some(ts(2025, 4, 10)), summary),
            mk_candidate(EventType::Layoff, Some(ts(2025, 4, 12)), "Workforce trimmed at Acme"),
        ];
        assert_eq!(dedupe_and_store(&stage, "acme.com", again).await.unwrap(), 0);
        assert_eq!(store.events_for_domain("acme.com").await.unwrap().len(), 1);

        let page = log
            .read(stage.run_id, LogQuery::Since { seq: 0, limit: 10 })
            .await
            .unwrap();
        let reasons: Vec<&str> = page
            .entries
            .iter()
            .filter(|e| e.message == "Dedupe skip")
            .filter_map(|e| e.detail.as_ref()?.get("reason")?.as_str())
            .collect();
        assert_eq!(reasons, vec!["exact_summary", "time_window"]);
    }
}
