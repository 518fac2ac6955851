use chrono::{DateTime, Utc};
use expansion_adapters::{
    extract_json_object, parse_loose_timestamp, CompletionRequest, LanguageModel, ResponseSchema,
    MAX_ARTICLE_CHARS,
};
use expansion_core::{EventPayload, EventType, ExternalEvent, RawArticle};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Extracted events below this confidence are dropped.
pub const MIN_EVENT_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedEvent {
    pub event_type: EventType,
    pub event_ts: String,
    pub confidence: f64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionOutput {
    pub events: Vec<ExtractedEvent>,
}

/// An extracted event on its way to dedupe.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEvent {
    pub domain: String,
    pub event_type: EventType,
    /// Timestamp text as the model returned it.
    pub raw_ts: String,
    pub event_ts: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub source_url: Option<String>,
    pub confidence: f64,
    pub summary: String,
}

impl CandidateEvent {
    pub fn into_event(self, created_at: DateTime<Utc>) -> ExternalEvent {
        ExternalEvent {
            id: Uuid::new_v4(),
            domain: self.domain,
            event_type: self.event_type.as_str().to_string(),
            event_ts: self.event_ts,
            source: self.source,
            source_url: self.source_url,
            confidence: Some(self.confidence),
            payload: EventPayload {
                summary: self.summary,
                confidence: Some(self.confidence),
                extra: Default::default(),
            },
            created_at,
        }
    }
}

/// Validates raw model text and keeps events at or above
/// [`MIN_EVENT_CONFIDENCE`].
pub fn parse_extraction(
    text: &str,
    domain: &str,
    source_url: &str,
) -> EngineResult<Vec<CandidateEvent>> {
    let value = extract_json_object(text)?;
    let output: ExtractionOutput = serde_json::from_value(value)
        .map_err(|e| EngineError::InvalidModelOutput(e.to_string()))?;

    if let Some(bad) = output
        .events
        .iter()
        .find(|e| !(0.0..=1.0).contains(&e.confidence))
    {
        return Err(EngineError::InvalidModelOutput(format!(
            "confidence {} outside [0, 1]",
            bad.confidence
        )));
    }

    let source = Url::parse(source_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string));

    Ok(output
        .events
        .into_iter()
        .filter(|e| e.confidence >= MIN_EVENT_CONFIDENCE)
        .map(|e| CandidateEvent {
            domain: domain.to_string(),
            event_type: e.event_type,
            event_ts: parse_loose_timestamp(&e.event_ts),
            raw_ts: e.event_ts,
            source: source.clone(),
            source_url: Some(source_url.to_string()),
            confidence: e.confidence,
            summary: e.summary,
        })
        .collect())
}

pub async fn extract_events(
    model: &dyn LanguageModel,
    system_prompt: &str,
    article: &RawArticle,
) -> EngineResult<Vec<CandidateEvent>> {
    let article_text: String = article.article_text.chars().take(MAX_ARTICLE_CHARS).collect();
    let user = json!({
        "domain": article.domain,
        "article_text": article_text,
        "source_url": article.url,
        "published_date": article.published_date.map(|d| d.to_string()),
    });

    let request = CompletionRequest {
        system: system_prompt.to_string(),
        user: user.to_string(),
        temperature: 0.0,
        response_schema: Some(ResponseSchema::of::<ExtractionOutput>("external_events")),
    };
    let text = model
        .complete(&request)
        .await
        .map_err(|e| EngineError::Other(e.context(format!("event extraction failed for {}", article.url))))?;

    parse_extraction(&text, &article.domain, &article.url)
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://news.example.com/acme-clo";

    #[test]
    fn low_confidence_events_are_dropped() {
        let text = r#"Here you go: {"events": [
            {"event_type": "EXEC_HIRE_LD", "event_ts": "2025-04-02", "confidence": 0.9, "summary": "Acme hires a CLO"},
            {"event_type": "LAYOFF", "event_ts": "2025-04-03", "confidence": 0.59, "summary": "Rumoured cuts"}
        ]}"#;
        let events = parse_extraction(text, "acme.com", URL).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ExecHireLd);
        assert_eq!(events[0].source.as_deref(), Some("news.example.com"));
        assert_eq!(
            events[0].event_ts.map(|ts| ts.date_naive().to_string()),
            Some("2025-04-02".to_string())
        );
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let text = r#"{"events": [{"event_type": "PROMOTION", "event_ts": "2025-04-02", "confidence": 0.9, "summary": "x"}]}"#;
        assert!(matches!(
            parse_extraction(text, "acme.com", URL),
            Err(EngineError::InvalidModelOutput(_))
        ));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let text = r#"{"events": [{"event_type": "LAYOFF", "event_ts": "2025-04-02", "confidence": 1.5, "summary": "x"}]}"#;
        assert!(matches!(
            parse_extraction(text, "acme.com", URL),
            Err(EngineError::InvalidModelOutput(_))
        ));
    }

    #[test]
    fn unparseable_timestamp_keeps_the_event_undated() {
        let text = r#"{"events": [{"event_type": "LAYOFF", "event_ts": "early 2025", "confidence": 0.8, "summary": "Acme cuts staff"}]}"#;
        let events = parse_extraction(text, "acme.com", URL).unwrap();
        assert_eq!(events[0].event_ts, None);
        assert_eq!(events[0].raw_ts, "early 2025");
    }
}
