use chrono::Utc;
use expansion_adapters::{extract_json_object, CompletionRequest, LanguageModel, ResponseSchema};
use expansion_core::{Judgment, LlmEvaluation, Run, RunStep, StoredSnapshot};
use expansion_storage::EngineStore;
use serde_json::{json, Value};

use crate::error::{EngineError, EngineResult};
use crate::run_log::{LogFields, RunLog};

const WHY_NOW_PREVIEW: usize = 120;
const REASONING_PREVIEW: usize = 80;

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Strict parse of the judge's reply. Scores must be finite and in 0..=100.
pub fn parse_judgment(text: &str) -> EngineResult<(Judgment, Value)> {
    let raw = extract_json_object(text)?;
    let judgment: Judgment = serde_json::from_value(raw.clone())
        .map_err(|e| EngineError::InvalidModelOutput(e.to_string()))?;

    for (name, score) in [
        ("expansion_score", judgment.expansion_score),
        ("risk_score", judgment.risk_score),
    ] {
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(EngineError::InvalidModelOutput(format!(
                "{name} {score} outside [0, 100]"
            )));
        }
    }
    Ok((judgment, raw))
}

pub(crate) struct Judge<'a> {
    pub store: &'a dyn EngineStore,
    pub log: &'a RunLog,
    pub model: &'a dyn LanguageModel,
    pub system_prompt: &'a str,
}

impl Judge<'_> {
    /// Scores one snapshot and stores the evaluation for (run, domain).
    pub async fn evaluate(&self, run: &Run, snapshot: &StoredSnapshot) -> EngineResult<LlmEvaluation> {
        let domain = snapshot.domain.as_str();
        let context = &snapshot.context;
        let user = serde_json::to_string(context).map_err(anyhow::Error::from)?;

        self.log
            .info(
                run.id,
                "LLM evaluation input",
                LogFields::step(RunStep::LlmEval).domain(domain).detail(json!({
                    "evaluation_month": context.evaluation_context.evaluation_month.to_string(),
                    "data_quality_score": context.evaluation_context.data_quality_score,
                    "account_name": context.account_profile.account_name,
                    "atomic_signals_count": context.atomic_signals.len(),
                    "historical_signal_stats_count": context.historical_signal_stats.len(),
                    "input_char_count": user.chars().count(),
                })),
            )
            .await;

        let request = CompletionRequest {
            system: self.system_prompt.to_string(),
            user,
            temperature: 0.0,
            response_schema: Some(ResponseSchema::of::<Judgment>("expansion_judgment")),
        };
        let text = self
            .model
            .complete(&request)
            .await
            .map_err(|e| EngineError::Other(e.context(format!("LLM call failed for {domain}"))))?;

        let (judgment, raw) = parse_judgment(&text).map_err(|err| match err {
            EngineError::InvalidModelOutput(msg) => {
                EngineError::InvalidModelOutput(format!("{domain}: {msg}"))
            }
            other => other,
        })?;

        self.log
            .info(
                run.id,
                "LLM evaluation output",
                LogFields::step(RunStep::LlmEval).domain(domain).detail(json!({
                    "expansion_score": judgment.expansion_score,
                    "risk_score": judgment.risk_score,
                    "recommended_motion": judgment.recommended_motion.as_str(),
                    "evidence_used_count": judgment.evidence_used.len(),
                    "why_now": preview(&judgment.why_now, WHY_NOW_PREVIEW),
                    "reasoning_preview": preview(&judgment.reasoning, REASONING_PREVIEW),
                })),
            )
            .await;

        let evaluation = LlmEvaluation {
            run_id: run.id,
            domain: domain.to_string(),
            prompt_version: run.prompt_version_or_default().to_string(),
            signal_version: run.signal_version.clone(),
            lift_stats_version: run.lift_stats_version.clone(),
            engine_version: run.engine_version.clone(),
            model_name: self.model.model_name().to_string(),
            expansion_score: judgment.expansion_score,
            risk_score: judgment.risk_score,
            recommended_motion: judgment.recommended_motion,
            why_now: judgment.why_now,
            reasoning: judgment.reasoning,
            evidence_used: judgment.evidence_used,
            raw_response: raw,
            created_at: Utc::now(),
        };
        self.store.insert_evaluation(&evaluation).await?;
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expansion_core::{EvidenceDirection, Motion};

    #[test]
    fn parses_judgment_wrapped_in_prose() {
        let text = r#"Sure. {"expansion_score": 82, "risk_score": 12.5, "recommended_motion": "EXPAND",
            "evidence_used": [{"signal_type": "seat_saturation", "lift_ratio": 1.8,
              "direction": "positive_expansion", "confidence": "high"}],
            "why_now": "Seats nearly full", "reasoning": "Usage is high."} Thanks"#;
        let (judgment, raw) = parse_judgment(text).unwrap();
        assert_eq!(judgment.recommended_motion, Motion::Expand);
        assert_eq!(judgment.evidence_used[0].direction, EvidenceDirection::PositiveExpansion);
        assert_eq!(raw["risk_score"], 12.5);
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let text = r#"{"expansion_score": 120, "risk_score": 0, "recommended_motion": "SAVE",
            "evidence_used": [], "why_now": "", "reasoning": ""}"#;
        assert!(matches!(parse_judgment(text), Err(EngineError::InvalidModelOutput(_))));
    }

    #[test]
    fn missing_fields_and_garbage_are_rejected() {
        assert!(matches!(
            parse_judgment(r#"{"expansion_score": 50}"#),
            Err(EngineError::InvalidModelOutput(_))
        ));
        assert!(matches!(parse_judgment("no json here"), Err(EngineError::InvalidModelOutput(_))));
    }

    #[test]
    fn previews_truncate_with_ellipsis() {
        assert_eq!(preview("short", 80), "short");
        let long = "x".repeat(130);
        let out = preview(&long, 120);
        assert_eq!(out.chars().count(), 120);
        assert!(out.ends_with("..."));
    }
}
