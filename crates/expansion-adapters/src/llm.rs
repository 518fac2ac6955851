use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::AdapterError;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";

/// Named JSON schema sent as a strict response format.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

impl ResponseSchema {
    pub fn of<T: JsonSchema>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: openai_schema::<T>(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub response_schema: Option<ResponseSchema>,
}

/// Request/response text completion. No streaming.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AdapterError::Config("OPENAI_API_KEY is not set".into()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Config(format!("building llm client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: model.into(),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            response_format: request.response_schema.as_ref().map(|s| {
                serde_json::json!({
                    "type": "json_schema",
                    "json_schema": { "name": s.name, "strict": true, "schema": s.schema },
                })
            }),
        };

        debug!(model = %self.model, "chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("chat completion error ({}): {}", status, error_text));
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("no content in chat completion response"))
    }
}

/// Slice from the first `{` to the last `}` and parse it.
pub fn extract_json_object(text: &str) -> Result<Value, AdapterError> {
    let trimmed = text.trim();
    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(AdapterError::InvalidOutput(
            "no JSON object in response".into(),
        ));
    };
    if end <= start {
        return Err(AdapterError::InvalidOutput(
            "no JSON object in response".into(),
        ));
    }
    serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| AdapterError::InvalidOutput(format!("unparseable JSON: {e}")))
}

/// Strict-mode JSON schema for `T`: closed objects, every property required,
/// definitions inlined.
pub fn openai_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_default();

    let definitions = value.get("definitions").cloned();
    if let Some(defs) = &definitions {
        inline_refs(&mut value, defs);
    }
    close_objects(&mut value);

    if let Value::Object(map) = &mut value {
        map.remove("definitions");
        map.remove("$schema");
    }
    value
}

fn close_objects(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.get("type") == Some(&Value::String("object".into())) {
                map.insert("additionalProperties".into(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let keys = props.keys().cloned().map(Value::String).collect();
                    map.insert("required".into(), Value::Array(keys));
                }
            }
            if matches!(map.get("type"), Some(Value::String(t)) if t == "number" || t == "integer")
            {
                map.remove("format");
            }
            for (_, v) in map.iter_mut() {
                close_objects(v);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(path)) = map.get("$ref").cloned() {
                if let Some(def) = path
                    .strip_prefix("#/definitions/")
                    .and_then(|name| definitions.get(name))
                {
                    *value = def.clone();
                    inline_refs(value, definitions);
                    return;
                }
            }
            if let Some(Value::Array(all_of)) = map.get("allOf").cloned() {
                if let [single] = all_of.as_slice() {
                    *value = single.clone();
                    inline_refs(value, definitions);
                    return;
                }
            }
            for (_, v) in map.iter_mut() {
                inline_refs(v, definitions);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| inline_refs(v, definitions)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expansion_core::Judgment;

    #[test]
    fn json_object_is_sliced_out_of_prose() {
        let value =
            extract_json_object("Sure! ```json\n{\"events\": [{\"a\": 1}]}\n``` hope that helps")
                .unwrap();
        assert_eq!(value["events"][0]["a"], 1);
    }

    #[test]
    fn missing_or_broken_json_is_invalid_output() {
        assert!(matches!(
            extract_json_object("no braces here"),
            Err(AdapterError::InvalidOutput(_))
        ));
        assert!(matches!(
            extract_json_object("} backwards {"),
            Err(AdapterError::InvalidOutput(_))
        ));
        assert!(matches!(
            extract_json_object("{ not: json }"),
            Err(AdapterError::InvalidOutput(_))
        ));
    }

    #[test]
    fn judgment_schema_is_closed_and_inlined() {
        let schema = openai_schema::<Judgment>();
        let obj = schema.as_object().unwrap();
        assert!(!obj.contains_key("definitions"));
        assert_eq!(obj["additionalProperties"], Value::Bool(false));

        let required: Vec<&str> = obj["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"recommended_motion"));
        assert!(required.contains(&"evidence_used"));

        let evidence_item = &obj["properties"]["evidence_used"]["items"];
        assert!(evidence_item.get("$ref").is_none());
        assert_eq!(evidence_item["additionalProperties"], Value::Bool(false));
        assert!(obj["properties"]["expansion_score"].get("format").is_none());
    }

    #[test]
    fn model_without_key_is_config_error() {
        let err = OpenAiChatModel::new(Some("  ".into()), "gpt-4o", Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::Config(_)));
    }
}
