//! Core domain model for the expansion signal engine.
//!
//! Everything that crosses a crate boundary lives here: account and telemetry
//! rows, external events, atomic signals, lift statistics, runs and their log,
//! context snapshots and judge output.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "expansion-core";

pub const SIGNAL_VERSION: &str = "v1.0";
pub const LIFT_STATS_VERSION: &str = "v1.0";
pub const ENGINE_VERSION: &str = "v1.0";
pub const DEFAULT_PROMPT_VERSION: &str = "v1";

const MAX_DOMAIN_LEN: usize = 253;

/// Canonicalize a raw domain or URL into the join key used everywhere else.
///
/// Returns an empty string when nothing usable remains.
pub fn sanitize_domain(raw: &str) -> String {
    let mut s = raw.trim().to_ascii_lowercase();

    for scheme in ["https://", "http://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest.to_string();
            break;
        }
    }

    if let Some(idx) = s.find(['/', '?', '#']) {
        s.truncate(idx);
    }
    if let Some(rest) = s.strip_prefix("www.") {
        s = rest.to_string();
    }
    let s = s.trim_end_matches('.');

    if s.is_empty() || s.len() > MAX_DOMAIN_LEN {
        return String::new();
    }
    s.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Generates `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// serde names are listed explicitly.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError::new($kind, other)),
                }
            }
        }
    };
}

/// Customer account, keyed by canonical domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// CRM account id; opportunities join to accounts through it.
    pub account_id: String,
    pub domain: String,
    pub account_name: String,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub arr: Option<f64>,
    #[serde(default)]
    pub renewal_date: Option<NaiveDate>,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub licensed_seats: Option<i64>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub last_enriched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_enrichment_run_id: Option<Uuid>,
}

/// Listing projection of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub domain: String,
    pub account_name: String,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub last_enrichment_run_id: Option<Uuid>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            domain: account.domain.clone(),
            account_name: account.account_name.clone(),
            last_enriched_at: account.last_enriched_at,
            last_enrichment_run_id: account.last_enrichment_run_id,
        }
    }
}

/// One usage row per (domain, month).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRow {
    pub domain: String,
    /// First day of the month.
    pub month: NaiveDate,
    #[serde(default)]
    pub active_users: Option<i64>,
    #[serde(default)]
    pub licensed_seats: Option<i64>,
    #[serde(default)]
    pub feature_adoption_score: Option<f64>,
}

pub const STAGE_CLOSED_WON: &str = "Closed Won";
pub const OPPORTUNITY_TYPE_EXPANSION: &str = "Expansion";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub opportunity_id: String,
    pub account_id: String,
    pub stage: String,
    #[serde(default, rename = "type")]
    pub opportunity_type: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub close_date: Option<NaiveDate>,
}

impl Opportunity {
    pub fn is_closed_won(&self) -> bool {
        self.stage == STAGE_CLOSED_WON
    }

    pub fn is_expansion(&self) -> bool {
        self.is_closed_won() && self.opportunity_type.as_deref() == Some(OPPORTUNITY_TYPE_EXPANSION)
    }
}

/// Closed set of event types the extractor may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum EventType {
    #[serde(rename = "EXEC_HIRE_LD")]
    ExecHireLd,
    #[serde(rename = "EXEC_DEPARTURE_LD")]
    ExecDepartureLd,
    #[serde(rename = "LAYOFF")]
    Layoff,
    #[serde(rename = "HEADCOUNT_GROWTH")]
    HeadcountGrowth,
    #[serde(rename = "HEADCOUNT_DECLINE")]
    HeadcountDecline,
}

string_enum!(EventType, "event type", {
    ExecHireLd => "EXEC_HIRE_LD",
    ExecDepartureLd => "EXEC_DEPARTURE_LD",
    Layoff => "LAYOFF",
    HeadcountGrowth => "HEADCOUNT_GROWTH",
    HeadcountDecline => "HEADCOUNT_DECLINE",
});

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::ExecHireLd,
        EventType::ExecDepartureLd,
        EventType::Layoff,
        EventType::HeadcountGrowth,
        EventType::HeadcountDecline,
    ];

    pub fn is_executive(&self) -> bool {
        matches!(self, EventType::ExecHireLd | EventType::ExecDepartureLd)
    }
}

/// Event payload: a summary used for near-duplicate comparison plus whatever
/// else the source attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventPayload {
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Append-only external event.
///
/// `event_type` stays a string because bulk-ingested rows are not limited to
/// [`EventType`]; extractor output always is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub id: Uuid,
    pub domain: String,
    pub event_type: String,
    #[serde(default)]
    pub event_ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

impl ExternalEvent {
    pub fn typed(&self) -> Option<EventType> {
        self.event_type.parse().ok()
    }

    pub fn event_date(&self) -> Option<NaiveDate> {
        self.event_ts.map(|ts| ts.date_naive())
    }
}

/// Search-query category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    ExecHire,
    ExecDeparture,
    Layoff,
    HeadcountGrowth,
}

string_enum!(QueryCategory, "query category", {
    ExecHire => "exec_hire",
    ExecDeparture => "exec_departure",
    Layoff => "layoff",
    HeadcountGrowth => "headcount_growth",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub category: QueryCategory,
}

/// Raw search hit kept for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultRecord {
    pub domain: String,
    pub query: String,
    pub category: QueryCategory,
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub searched_at: DateTime<Utc>,
}

/// Cleaned article text as accepted by the fetch layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    pub domain: String,
    pub url: String,
    pub article_text: String,
    pub published_date: Option<NaiveDate>,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    SeatSaturation,
    AdoptionAcceleration,
    FeatureAdoptionHigh,
    UsageDecline,
    LayoffEventRecent,
    ExecDepartureLdRecent,
}

string_enum!(SignalType, "signal type", {
    SeatSaturation => "seat_saturation",
    AdoptionAcceleration => "adoption_acceleration",
    FeatureAdoptionHigh => "feature_adoption_high",
    UsageDecline => "usage_decline",
    LayoffEventRecent => "layoff_event_recent",
    ExecDepartureLdRecent => "exec_departure_ld_recent",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalCategory {
    Expansion,
    Risk,
    Reengage,
}

impl SignalType {
    pub const ALL: [SignalType; 6] = [
        SignalType::SeatSaturation,
        SignalType::AdoptionAcceleration,
        SignalType::FeatureAdoptionHigh,
        SignalType::UsageDecline,
        SignalType::LayoffEventRecent,
        SignalType::ExecDepartureLdRecent,
    ];

    pub fn category(&self) -> SignalCategory {
        match self {
            SignalType::SeatSaturation
            | SignalType::AdoptionAcceleration
            | SignalType::FeatureAdoptionHigh => SignalCategory::Expansion,
            SignalType::UsageDecline
            | SignalType::LayoffEventRecent
            | SignalType::ExecDepartureLdRecent => SignalCategory::Risk,
        }
    }
}

/// Upserted per (domain, month, signal_type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicSignal {
    pub domain: String,
    pub month: NaiveDate,
    pub signal_type: SignalType,
    pub signal_value: f64,
    pub signal_score: i32,
    pub signal_timestamp: NaiveDate,
    pub signal_version: String,
}

/// Appended on every lift-stats computation; history is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiftStat {
    pub id: Uuid,
    pub signal_type: SignalType,
    pub expansion_rate: f64,
    pub non_expansion_rate: f64,
    pub lift_ratio: f64,
    pub sample_size: i64,
    pub lift_stats_version: String,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
    Halted,
}

string_enum!(RunStatus, "run status", {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Partial => "partial",
    Halted => "halted",
});

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Pipeline step; doubles as the step tag on run log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStep {
    Created,
    ExternalEvents,
    ExternalEventsQueryBuilder,
    ExternalEventsSearch,
    ExternalEventsFetch,
    ExternalEventsExtract,
    ExternalEventsDedupeStore,
    AtomicSignals,
    LiftStats,
    LlmEval,
    Completed,
}

string_enum!(RunStep, "run step", {
    Created => "created",
    ExternalEvents => "external_events",
    ExternalEventsQueryBuilder => "external_events_query_builder",
    ExternalEventsSearch => "external_events_search",
    ExternalEventsFetch => "external_events_fetch",
    ExternalEventsExtract => "external_events_extract",
    ExternalEventsDedupeStore => "external_events_dedupe_store",
    AtomicSignals => "atomic_signals",
    LiftStats => "lift_stats",
    LlmEval => "llm_eval",
    Completed => "completed",
});

/// Counters produced by the enrichment sub-pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnrichmentSummary {
    pub domains_processed: usize,
    pub domains_skipped: usize,
    pub articles_fetched: usize,
    pub articles_failed: usize,
    pub events_stored: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// What kind of run a [`Run`] row describes, with the inputs needed to
/// re-derive its account slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "run_type", rename_all = "snake_case")]
pub enum RunKind {
    Full {
        start_row: usize,
        event_prompt_id: Option<String>,
        prompt_id: Option<String>,
    },
    EvaluationOnly {
        start_row: usize,
        prompt_id: Option<String>,
    },
    EnrichmentOnly {
        domain: String,
        event_prompt_id: Option<String>,
    },
}

impl RunKind {
    /// 1-based start row of the slice.
    pub fn start_row(&self) -> usize {
        match self {
            RunKind::Full { start_row, .. } | RunKind::EvaluationOnly { start_row, .. } => {
                (*start_row).max(1)
            }
            RunKind::EnrichmentOnly { .. } => 1,
        }
    }

    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            RunKind::Full { prompt_id, .. } | RunKind::EvaluationOnly { prompt_id, .. } => {
                prompt_id.as_deref()
            }
            RunKind::EnrichmentOnly { .. } => None,
        }
    }

    pub fn event_prompt_id(&self) -> Option<&str> {
        match self {
            RunKind::Full {
                event_prompt_id, ..
            }
            | RunKind::EnrichmentOnly {
                event_prompt_id, ..
            } => event_prompt_id.as_deref(),
            RunKind::EvaluationOnly { .. } => None,
        }
    }
}

/// Typed config blob persisted on the run row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub kind: RunKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment_summary: Option<EnrichmentSummary>,
}

impl RunConfig {
    pub fn new(kind: RunKind) -> Self {
        Self {
            kind,
            enrichment_summary: None,
        }
    }
}

/// Live progress pointer. Each stage hands one back and the orchestrator
/// persists it on the run row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Progress {
    pub step: Option<RunStep>,
    pub domain: Option<String>,
    pub substep: Option<String>,
}

impl Progress {
    pub fn step(step: RunStep) -> Self {
        Self {
            step: Some(step),
            ..Self::default()
        }
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn substep(mut self, label: impl Into<String>) -> Self {
        self.substep = Some(label.into());
        self
    }

    pub fn cleared() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub evaluation_month: NaiveDate,
    pub prompt_version: Option<String>,
    pub signal_version: String,
    pub lift_stats_version: String,
    pub engine_version: String,
    pub status: RunStatus,
    pub processed_count: usize,
    pub total_customers: usize,
    pub last_processed_index: Option<usize>,
    pub current_step: Option<RunStep>,
    pub current_domain: Option<String>,
    pub substep_label: Option<String>,
    pub config: RunConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// New `running` run stamped with the current version tags.
    pub fn start(
        evaluation_month: NaiveDate,
        prompt_version: Option<String>,
        total_customers: usize,
        first_step: RunStep,
        config: RunConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            evaluation_month,
            prompt_version,
            signal_version: SIGNAL_VERSION.to_string(),
            lift_stats_version: LIFT_STATS_VERSION.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            status: RunStatus::Running,
            processed_count: 0,
            total_customers,
            last_processed_index: None,
            current_step: Some(first_step),
            current_domain: None,
            substep_label: None,
            config,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, progress: Progress) {
        self.current_step = progress.step;
        self.current_domain = progress.domain;
        self.substep_label = progress.substep;
        self.updated_at = Utc::now();
    }

    pub fn prompt_version_or_default(&self) -> &str {
        self.prompt_version.as_deref().unwrap_or(DEFAULT_PROMPT_VERSION)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

string_enum!(LogLevel, "log level", {
    Info => "info",
    Warn => "warn",
    Error => "error",
});

/// Log entry before the store assigns its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogDraft {
    pub run_id: Uuid,
    pub level: LogLevel,
    pub domain: Option<String>,
    pub step: Option<RunStep>,
    pub message: String,
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub run_id: Uuid,
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub domain: Option<String>,
    pub step: Option<RunStep>,
    pub message: String,
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub evaluation_month: NaiveDate,
    pub data_quality_score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub account_name: String,
    pub domain: String,
    pub arr: Option<f64>,
    pub renewal_date: Option<NaiveDate>,
    pub segment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSignal {
    pub signal_type: SignalType,
    pub signal_category: SignalCategory,
    pub signal_value: f64,
    pub signal_score: i32,
    pub signal_timestamp: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSignalStat {
    pub signal_type: SignalType,
    pub expansion_rate: f64,
    pub non_expansion_rate: f64,
    pub lift_ratio: f64,
    pub sample_size: i64,
}

impl From<&LiftStat> for HistoricalSignalStat {
    fn from(stat: &LiftStat) -> Self {
        Self {
            signal_type: stat.signal_type,
            expansion_rate: stat.expansion_rate,
            non_expansion_rate: stat.non_expansion_rate,
            lift_ratio: stat.lift_ratio,
            sample_size: stat.sample_size,
        }
    }
}

/// The document handed to the judge for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub evaluation_context: EvaluationContext,
    pub account_profile: AccountProfile,
    pub atomic_signals: Vec<SnapshotSignal>,
    pub historical_signal_stats: Vec<HistoricalSignalStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub run_id: Uuid,
    pub domain: String,
    pub evaluation_month: NaiveDate,
    pub data_quality_score: i32,
    pub context: ContextSnapshot,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Motion {
    Expand,
    Monitor,
    Save,
}

string_enum!(Motion, "motion", {
    Expand => "EXPAND",
    Monitor => "MONITOR",
    Save => "SAVE",
});

impl Motion {
    /// Export ordering: EXPAND before MONITOR before SAVE.
    pub fn rank(&self) -> u8 {
        match self {
            Motion::Expand => 0,
            Motion::Monitor => 1,
            Motion::Save => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceDirection {
    PositiveExpansion,
    PositiveRisk,
    Conflicting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceConfidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Evidence {
    pub signal_type: String,
    pub lift_ratio: f64,
    pub direction: EvidenceDirection,
    pub confidence: EvidenceConfidence,
}

/// Structured judgment returned by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Judgment {
    pub expansion_score: f64,
    pub risk_score: f64,
    pub recommended_motion: Motion,
    pub evidence_used: Vec<Evidence>,
    pub why_now: String,
    pub reasoning: String,
}

/// Persisted judgment; its presence marks (run, domain) as done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmEvaluation {
    pub run_id: Uuid,
    pub domain: String,
    pub prompt_version: String,
    pub signal_version: String,
    pub lift_stats_version: String,
    pub engine_version: String,
    pub model_name: String,
    pub expansion_score: f64,
    pub risk_score: f64,
    pub recommended_motion: Motion,
    pub why_now: String,
    pub reasoning: String,
    pub evidence_used: Vec<Evidence>,
    pub raw_response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_domain_strips_scheme_path_and_www() {
        assert_eq!(sanitize_domain("  HTTPS://www.Acme.com/about?x=1#top "), "acme.com");
        assert_eq!(sanitize_domain("http://sub.acme.io."), "sub.acme.io");
        assert_eq!(sanitize_domain("acme.com?utm=1"), "acme.com");
        assert_eq!(sanitize_domain("acme.com#frag"), "acme.com");
    }

    #[test]
    fn sanitize_domain_rejects_empty_and_oversized() {
        assert_eq!(sanitize_domain("   "), "");
        assert_eq!(sanitize_domain("https://"), "");
        assert_eq!(sanitize_domain(&"a".repeat(254)), "");
        assert_eq!(sanitize_domain(&"a".repeat(253)).len(), 253);
    }

    #[test]
    fn enums_round_trip_through_strings() {
        for ty in SignalType::ALL {
            assert_eq!(ty.as_str().parse::<SignalType>().unwrap(), ty);
        }
        for ty in EventType::ALL {
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
        }
        assert!("promotion".parse::<EventType>().is_err());
        assert_eq!(
            serde_json::to_string(&RunStep::ExternalEventsDedupeStore).unwrap(),
            "\"external_events_dedupe_store\""
        );
    }

    #[test]
    fn signal_categories_follow_fixed_lookup() {
        assert_eq!(SignalType::SeatSaturation.category(), SignalCategory::Expansion);
        assert_eq!(SignalType::UsageDecline.category(), SignalCategory::Risk);
        assert_eq!(
            serde_json::to_string(&SignalCategory::Reengage).unwrap(),
            "\"REENGAGE\""
        );
    }

    #[test]
    fn run_config_serializes_with_run_type_tag() {
        let mut config = RunConfig::new(RunKind::EnrichmentOnly {
            domain: "acme.com".into(),
            event_prompt_id: None,
        });
        config.enrichment_summary = Some(EnrichmentSummary {
            domains_processed: 1,
            ..EnrichmentSummary::default()
        });
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["kind"]["run_type"], "enrichment_only");
        assert_eq!(value["enrichment_summary"]["domains_processed"], 1);
        let back: RunConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.kind.start_row(), 1);
    }

    #[test]
    fn judgment_rejects_unknown_motion() {
        let raw = serde_json::json!({
            "expansion_score": 50,
            "risk_score": 10,
            "recommended_motion": "UPSELL",
            "evidence_used": [],
            "why_now": "",
            "reasoning": ""
        });
        assert!(serde_json::from_value::<Judgment>(raw).is_err());
    }

    #[test]
    fn event_payload_keeps_extra_fields() {
        let payload: EventPayload =
            serde_json::from_str(r#"{"summary":"New CLO","confidence":0.9,"title":"x"}"#).unwrap();
        assert_eq!(payload.summary, "New CLO");
        assert_eq!(payload.extra["title"], "x");
    }
}
