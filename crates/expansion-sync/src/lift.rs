use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use expansion_core::{AtomicSignal, LiftStat, Opportunity, SignalType, LIFT_STATS_VERSION, SIGNAL_VERSION};
use expansion_storage::EngineStore;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineResult;

/// How far before a close date a signal counts as present.
pub const LOOKBACK_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiftCounts {
    pub expansion_with: u64,
    pub total_with: u64,
    pub expansion_without: u64,
    pub total_without: u64,
}

impl LiftCounts {
    fn rate(hits: u64, total: u64) -> f64 {
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn expansion_rate(&self) -> f64 {
        Self::rate(self.expansion_with, self.total_with)
    }

    pub fn non_expansion_rate(&self) -> f64 {
        Self::rate(self.expansion_without, self.total_without)
    }

    /// Falls back to the expansion rate when the other side is zero.
    pub fn lift_ratio(&self) -> f64 {
        let non_expansion = self.non_expansion_rate();
        if non_expansion > 0.0 {
            self.expansion_rate() / non_expansion
        } else {
            self.expansion_rate()
        }
    }

    pub fn sample_size(&self) -> u64 {
        self.total_with + self.total_without
    }
}

fn signal_present(
    signals: &[AtomicSignal],
    domain: &str,
    signal_type: SignalType,
    close_date: NaiveDate,
) -> bool {
    let from = close_date - Duration::days(LOOKBACK_DAYS);
    signals.iter().any(|s| {
        s.signal_type == signal_type
            && s.domain == domain
            && s.month >= from
            && s.month <= close_date
            && s.signal_value > 0.0
    })
}

/// Partitions closed-won deals by signal presence for one signal type.
pub fn count_lift(
    signal_type: SignalType,
    opportunities: &[Opportunity],
    domain_by_account: &HashMap<String, String>,
    signals: &[AtomicSignal],
) -> LiftCounts {
    let mut counts = LiftCounts {
        expansion_with: 0,
        total_with: 0,
        expansion_without: 0,
        total_without: 0,
    };

    for opp in opportunities.iter().filter(|o| o.is_closed_won()) {
        let Some(domain) = domain_by_account.get(&opp.account_id) else {
            continue;
        };
        let Some(close_date) = opp.close_date else {
            continue;
        };
        let expansion = u64::from(opp.is_expansion());
        if signal_present(signals, domain, signal_type, close_date) {
            counts.total_with += 1;
            counts.expansion_with += expansion;
        } else {
            counts.total_without += 1;
            counts.expansion_without += expansion;
        }
    }
    counts
}

/// Appends one fresh lift row per signal type. Earlier rows stay as history.
pub async fn compute_lift_stats(store: &dyn EngineStore) -> EngineResult<Vec<LiftStat>> {
    let opportunities = store.closed_won_opportunities().await?;
    let domain_by_account: HashMap<String, String> = store
        .list_accounts()
        .await?
        .into_iter()
        .filter(|a| !a.domain.is_empty())
        .map(|a| (a.account_id, a.domain))
        .collect();
    let signals = store.signals_with_version(SIGNAL_VERSION).await?;
    let computed_at = Utc::now();

    let mut stats = Vec::with_capacity(SignalType::ALL.len());
    for signal_type in SignalType::ALL {
        let counts = count_lift(signal_type, &opportunities, &domain_by_account, &signals);
        let stat = LiftStat {
            id: Uuid::new_v4(),
            signal_type,
            expansion_rate: counts.expansion_rate(),
            non_expansion_rate: counts.non_expansion_rate(),
            lift_ratio: counts.lift_ratio(),
            sample_size: counts.sample_size() as i64,
            lift_stats_version: LIFT_STATS_VERSION.to_string(),
            computed_at,
        };
        store.insert_lift_stat(&stat).await?;
        stats.push(stat);
    }

    info!(opportunities = opportunities.len(), signals = signals.len(), "lift stats computed");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn opp(id: &str, account: &str, kind: &str, close: NaiveDate) -> Opportunity {
        Opportunity {
            opportunity_id: id.into(),
            account_id: account.into(),
            stage: "Closed Won".into(),
            opportunity_type: Some(kind.into()),
            amount: None,
            close_date: Some(close),
        }
    }

    fn seat_signal(domain: &str, month: NaiveDate, value: f64) -> AtomicSignal {
        AtomicSignal {
            domain: domain.into(),
            month,
            signal_type: SignalType::SeatSaturation,
            signal_value: value,
            signal_score: (value * 100.0).round() as i32,
            signal_timestamp: month,
            signal_version: SIGNAL_VERSION.into(),
        }
    }

    fn accounts() -> HashMap<String, String> {
        [("A1", "acme.com"), ("A2", "beta.io"), ("A3", "gamma.dev")]
            .into_iter()
            .map(|(a, d)| (a.to_string(), d.to_string()))
            .collect()
    }

    #[test]
    fn rates_partition_by_signal_presence() {
        let opportunities = vec![
            opp("O1", "A1", "Expansion", date(5, 15)),
            opp("O2", "A2", "New Business", date(5, 15)),
            opp("O3", "A3", "Expansion", date(5, 15)),
            opp("O4", "A3", "Renewal", date(5, 20)),
        ];
        let signals = vec![
            seat_signal("acme.com", date(4, 1), 0.9),
            seat_signal("beta.io", date(5, 1), 0.4),
            seat_signal("gamma.dev", date(1, 1), 0.9),
        ];
        let counts = count_lift(SignalType::SeatSaturation, &opportunities, &accounts(), &signals);
        assert_eq!(counts.total_with, 2);
        assert_eq!(counts.expansion_with, 1);
        assert_eq!(counts.total_without, 2);
        assert_eq!(counts.expansion_without, 1);
        assert_eq!(counts.lift_ratio(), 1.0);
        assert_eq!(counts.sample_size(), 4);
    }

    #[test]
    fn zero_denominator_falls_back_to_expansion_rate() {
        let opportunities = vec![opp("O1", "A1", "Expansion", date(5, 15))];
        let signals = vec![seat_signal("acme.com", date(5, 1), 1.0)];
        let counts = count_lift(SignalType::SeatSaturation, &opportunities, &accounts(), &signals);
        assert_eq!(counts.non_expansion_rate(), 0.0);
        assert_eq!(counts.lift_ratio(), 1.0);
        assert!(counts.lift_ratio().is_finite());

        let empty = count_lift(SignalType::UsageDecline, &[], &accounts(), &signals);
        assert_eq!(empty.lift_ratio(), 0.0);
    }

    #[test]
    fn zero_valued_signals_do_not_count_as_present() {
        let opportunities = vec![opp("O1", "A1", "Expansion", date(5, 15))];
        let signals = vec![seat_signal("acme.com", date(5, 1), 0.0)];
        let counts = count_lift(SignalType::SeatSaturation, &opportunities, &accounts(), &signals);
        assert_eq!(counts.total_with, 0);
        assert_eq!(counts.total_without, 1);
    }

    #[test]
    fn unknown_accounts_and_missing_close_dates_are_skipped() {
        let mut undated = opp("O2", "A1", "Expansion", date(5, 15));
        undated.close_date = None;
        let opportunities = vec![opp("O1", "ZZ", "Expansion", date(5, 15)), undated];
        let counts = count_lift(SignalType::SeatSaturation, &opportunities, &accounts(), &[]);
        assert_eq!(counts.sample_size(), 0);
    }

    fn account(id: &str, domain: &str) -> expansion_core::Account {
        expansion_core::Account {
            account_id: id.into(),
            domain: domain.into(),
            account_name: domain.into(),
            website: None,
            arr: None,
            renewal_date: None,
            segment: None,
            status: None,
            licensed_seats: None,
            extra: Default::default(),
            last_enriched_at: None,
            last_enrichment_run_id: None,
        }
    }

    #[tokio::test]
    async fn stored_ratios_are_finite_and_non_negative() {
        let store = expansion_storage::MemoryStore::new();
        for (id, domain) in [("A1", "acme.com"), ("A2", "beta.io"), ("A3", "gamma.dev")] {
            store.upsert_account(&account(id, domain)).await.unwrap();
        }
        let mut lost = opp("O5", "A2", "Expansion", date(5, 1));
        lost.stage = "Closed Lost".into();
        for o in [
            opp("O1", "A1", "Expansion", date(5, 15)),
            opp("O2", "A2", "New Business", date(5, 15)),
            opp("O3", "A3", "Expansion", date(5, 20)),
            opp("O4", "A1", "Renewal", date(5, 20)),
            lost,
        ] {
            store.upsert_opportunity(&o).await.unwrap();
        }
        store.upsert_signal(&seat_signal("acme.com", date(4, 1), 0.9)).await.unwrap();
        store.upsert_signal(&seat_signal("beta.io", date(5, 1), 0.0)).await.unwrap();

        let stats = compute_lift_stats(&store).await.unwrap();
        assert_eq!(stats.len(), SignalType::ALL.len());
        for stat in &stats {
            assert!(stat.lift_ratio.is_finite() && stat.lift_ratio >= 0.0, "{stat:?}");
            assert_eq!(stat.sample_size, 4);
        }
        let seat = stats
            .iter()
            .find(|s| s.signal_type == SignalType::SeatSaturation)
            .unwrap();
        assert_eq!(seat.expansion_rate, 0.5);
        assert_eq!(seat.non_expansion_rate, 0.5);
        assert_eq!(seat.lift_ratio, 1.0);

        compute_lift_stats(&store).await.unwrap();
        assert_eq!(store.lift_stats().await.unwrap().len(), 2 * SignalType::ALL.len());
    }
}
