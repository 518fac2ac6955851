use chrono::{Duration, NaiveDate};
use expansion_core::{AtomicSignal, ExternalEvent, SignalType, TelemetryRow, SIGNAL_VERSION};
use expansion_storage::EngineStore;
use tracing::debug;

use crate::error::EngineResult;

/// Trailing window for the event-based signals.
pub const RECENT_EVENT_DAYS: i64 = 90;
const HIGH_ADOPTION: f64 = 0.8;
const MEDIUM_ADOPTION: f64 = 0.5;
const USAGE_DECLINE_RATIO: f64 = 0.5;

fn is_layoff(event_type: &str) -> bool {
    let t = event_type.to_ascii_lowercase();
    t == "layoff" || t.contains("layoff") || t.contains("redundancy")
}

fn is_exec_departure(event_type: &str) -> bool {
    let t = event_type.to_ascii_lowercase();
    t == "exec_departure_ld" || t.contains("exec") || t.contains("departure") || t.contains("ld")
}

fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

/// The six signals for one (domain, month). Missing telemetry counts as zero.
pub fn derive_signals(
    domain: &str,
    month: NaiveDate,
    telemetry: Option<&TelemetryRow>,
    events: &[ExternalEvent],
) -> Vec<AtomicSignal> {
    let active = telemetry.and_then(|t| t.active_users).unwrap_or(0) as f64;
    let seats = telemetry.and_then(|t| t.licensed_seats).unwrap_or(0) as f64;
    let adoption = telemetry.and_then(|t| t.feature_adoption_score).unwrap_or(0.0);

    let saturation = if seats > 0.0 { (active / seats).min(1.0) } else { 0.0 };
    let acceleration = if adoption >= HIGH_ADOPTION {
        1.0
    } else if adoption >= MEDIUM_ADOPTION {
        0.5
    } else {
        0.0
    };
    let decline = seats > 0.0 && active / seats < USAGE_DECLINE_RATIO;

    let window_start = month - Duration::days(RECENT_EVENT_DAYS);
    let recent: Vec<&ExternalEvent> = events
        .iter()
        .filter(|e| {
            e.event_date()
                .map(|d| d >= window_start && d <= month)
                .unwrap_or(false)
        })
        .collect();
    let layoff = recent.iter().any(|e| is_layoff(&e.event_type));
    let departure = recent.iter().any(|e| is_exec_departure(&e.event_type));

    let signal = |signal_type: SignalType, value: f64| AtomicSignal {
        domain: domain.to_string(),
        month,
        signal_type,
        signal_value: value,
        signal_score: (value * 100.0).round() as i32,
        signal_timestamp: month,
        signal_version: SIGNAL_VERSION.to_string(),
    };

    vec![
        signal(SignalType::SeatSaturation, saturation),
        signal(SignalType::AdoptionAcceleration, acceleration),
        signal(SignalType::FeatureAdoptionHigh, flag(adoption >= HIGH_ADOPTION)),
        signal(SignalType::UsageDecline, flag(decline)),
        signal(SignalType::LayoffEventRecent, flag(layoff)),
        signal(SignalType::ExecDepartureLdRecent, flag(departure)),
    ]
}

/// Computes and upserts signals for every domain at `month`.
pub async fn compute_atomic_signals(
    store: &dyn EngineStore,
    domains: &[String],
    month: NaiveDate,
) -> EngineResult<usize> {
    let mut written = 0;
    for domain in domains {
        let telemetry = store.telemetry_for_domain(domain).await?;
        let row = telemetry.iter().find(|t| t.month == month);
        let events = store.events_for_domain(domain).await?;

        for signal in derive_signals(domain, month, row, &events) {
            store.upsert_signal(&signal).await?;
            written += 1;
        }
        debug!(domain, %month, has_telemetry = row.is_some(), "atomic signals computed");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use expansion_core::EventPayload;
    use uuid::Uuid;

    fn month() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn telemetry(active: i64, seats: i64, adoption: f64) -> TelemetryRow {
        TelemetryRow {
            domain: "acme.com".into(),
            month: month(),
            active_users: Some(active),
            licensed_seats: Some(seats),
            feature_adoption_score: Some(adoption),
        }
    }

    fn event(event_type: &str, y: i32, m: u32, d: u32) -> ExternalEvent {
        ExternalEvent {
            id: Uuid::new_v4(),
            domain: "acme.com".into(),
            event_type: event_type.into(),
            event_ts: Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).single(),
            source: None,
            source_url: None,
            confidence: None,
            payload: EventPayload::default(),
            created_at: Utc::now(),
        }
    }

    fn value(signals: &[AtomicSignal], ty: SignalType) -> (f64, i32) {
        let s = signals.iter().find(|s| s.signal_type == ty).unwrap();
        (s.signal_value, s.signal_score)
    }

    #[test]
    fn healthy_usage_scores_expansion_signals() {
        let row = telemetry(40, 50, 0.9);
        let signals = derive_signals("acme.com", month(), Some(&row), &[]);
        assert_eq!(signals.len(), 6);
        assert_eq!(value(&signals, SignalType::SeatSaturation), (0.8, 80));
        assert_eq!(value(&signals, SignalType::FeatureAdoptionHigh), (1.0, 100));
        assert_eq!(value(&signals, SignalType::AdoptionAcceleration), (1.0, 100));
        assert_eq!(value(&signals, SignalType::UsageDecline), (0.0, 0));
    }

    #[test]
    fn missing_telemetry_defaults_to_zero() {
        let signals = derive_signals("acme.com", month(), None, &[]);
        assert!(signals.iter().all(|s| s.signal_value == 0.0 && s.signal_score == 0));
        assert!(signals.iter().all(|s| s.signal_timestamp == month()));
    }

    #[test]
    fn low_usage_and_medium_adoption() {
        let row = telemetry(10, 50, 0.6);
        let signals = derive_signals("acme.com", month(), Some(&row), &[]);
        assert_eq!(value(&signals, SignalType::UsageDecline), (1.0, 100));
        assert_eq!(value(&signals, SignalType::AdoptionAcceleration), (0.5, 50));
        assert_eq!(value(&signals, SignalType::SeatSaturation), (0.2, 20));
    }

    #[test]
    fn recent_events_respect_ninety_day_window() {
        let events = vec![
            event("LAYOFF", 2025, 4, 15),
            event("EXEC_DEPARTURE_LD", 2025, 1, 15),
            event("HEADCOUNT_GROWTH", 2025, 5, 1),
        ];
        let signals = derive_signals("acme.com", month(), None, &events);
        assert_eq!(value(&signals, SignalType::LayoffEventRecent), (1.0, 100));
        assert_eq!(value(&signals, SignalType::ExecDepartureLdRecent), (0.0, 0));
    }

    #[test]
    fn type_matching_is_loose() {
        assert!(is_layoff("Redundancy_Program"));
        assert!(is_exec_departure("EXEC_DEPARTURE_LD"));
        assert!(!is_exec_departure("HEADCOUNT_GROWTH"));
    }

    #[tokio::test]
    async fn recomputing_a_month_leaves_rows_unchanged() {
        let store = expansion_storage::MemoryStore::new();
        store.upsert_telemetry(&telemetry(40, 50, 0.9)).await.unwrap();
        store.insert_event(&event("LAYOFF", 2025, 4, 15)).await.unwrap();
        let domains = vec!["acme.com".to_string()];

        assert_eq!(compute_atomic_signals(&store, &domains, month()).await.unwrap(), 6);
        let first = store.signals_for("acme.com", month()).await.unwrap();
        assert_eq!(compute_atomic_signals(&store, &domains, month()).await.unwrap(), 6);
        let second = store.signals_for("acme.com", month()).await.unwrap();

        assert_eq!(first.len(), 6);
        assert_eq!(first, second);
        assert_eq!(value(&second, SignalType::SeatSaturation), (0.8, 80));
        assert_eq!(value(&second, SignalType::LayoffEventRecent), (1.0, 100));
    }
}
