use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use expansion_core::{
    sanitize_domain, Account, EventPayload, ExternalEvent, Opportunity, TelemetryRow,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::read_json_file;

/// Already-parsed rows handed over by the ingestion boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestBundle {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub telemetry: Vec<TelemetryRow>,
    #[serde(default)]
    pub opportunities: Vec<Opportunity>,
    #[serde(default)]
    pub events: Vec<IngestEvent>,
}

/// Bulk-loaded event; the id and creation time are assigned on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEvent {
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
}

impl IngestEvent {
    pub fn into_event(self, created_at: DateTime<Utc>) -> ExternalEvent {
        ExternalEvent {
            id: Uuid::new_v4(),
            domain: self.domain,
            event_type: self.event_type,
            event_ts: self.event_ts,
            source: self.source,
            source_url: self.source_url,
            confidence: self.confidence,
            payload: self.payload,
            created_at,
        }
    }
}

impl IngestBundle {
    /// Canonicalizes every domain and drops rows left without one.
    pub fn normalized(mut self) -> Self {
        let before = self.accounts.len() + self.telemetry.len() + self.events.len();

        self.accounts.retain_mut(|a| {
            a.domain = sanitize_domain(&a.domain);
            !a.domain.is_empty()
        });
        self.telemetry.retain_mut(|t| {
            t.domain = sanitize_domain(&t.domain);
            !t.domain.is_empty()
        });
        self.events.retain_mut(|e| {
            e.domain = sanitize_domain(&e.domain);
            !e.domain.is_empty()
        });

        let dropped = before - (self.accounts.len() + self.telemetry.len() + self.events.len());
        if dropped > 0 {
            warn!(dropped, "dropped ingest rows without a usable domain");
        }
        self
    }
}

pub fn load_ingest_bundle(path: impl AsRef<Path>) -> Result<IngestBundle> {
    let bundle: IngestBundle = read_json_file(path)?;
    Ok(bundle.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn bundle_domains_are_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        fs::write(
            &path,
            r#"{
              "accounts": [
                { "account_id": "A1", "domain": "https://www.Acme.com/", "account_name": "Acme", "arr": 120000 },
                { "account_id": "A2", "domain": "   ", "account_name": "Nobody" }
              ],
              "telemetry": [
                { "domain": "ACME.com", "month": "2025-05-01", "active_users": 40, "licensed_seats": 50 }
              ],
              "opportunities": [
                { "opportunity_id": "O1", "account_id": "A1", "stage": "Closed Won", "type": "Expansion", "close_date": "2025-04-15" }
              ],
              "events": [
                { "domain": "www.acme.com", "event_type": "LAYOFF", "event_ts": "2025-04-01T00:00:00Z",
                  "payload": { "summary": "Acme cuts 5% of staff" } }
              ]
            }"#,
        )
        .unwrap();

        let bundle = load_ingest_bundle(&path).unwrap();
        assert_eq!(bundle.accounts.len(), 1);
        assert_eq!(bundle.accounts[0].domain, "acme.com");
        assert_eq!(bundle.telemetry[0].domain, "acme.com");
        assert!(bundle.opportunities[0].is_expansion());

        let event = bundle.events[0].clone().into_event(Utc::now());
        assert_eq!(event.domain, "acme.com");
        assert_eq!(event.payload.summary, "Acme cuts 5% of staff");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_ingest_bundle("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
