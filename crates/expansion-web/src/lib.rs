//! Axum JSON/CSV layer over the expansion engine.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use expansion_adapters::{IngestBundle, PromptMeta};
use expansion_sync::{Engine, EngineError, LogQuery, StartRunRequest, MAX_LOG_PAGE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "expansion-web";

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrichBody {
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    event_prompt_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LogParams {
    since: Option<String>,
    limit: Option<String>,
    tail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiPrompt {
    id: String,
    name: String,
    slug: String,
    version: &'static str,
    source: &'static str,
}

impl From<PromptMeta> for ApiPrompt {
    fn from(meta: PromptMeta) -> Self {
        Self {
            slug: meta.id.clone(),
            id: meta.id,
            name: meta.name,
            version: "v1",
            source: "filesystem",
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/engine/run", post(start_run_handler))
        .route("/api/engine/evaluate", post(evaluate_handler))
        .route("/api/engine/enrich", post(enrich_handler))
        .route("/api/engine/ingest", post(ingest_handler))
        .route("/api/engine/run/{run_id}", get(run_status_handler))
        .route("/api/engine/run/{run_id}/log", get(run_log_handler))
        .route("/api/engine/run/{run_id}/resume", post(resume_handler))
        .route("/api/engine/run/{run_id}/export", get(export_handler))
        .route("/api/engine/customers", get(customers_handler))
        .route("/api/engine/prompts", get(prompts_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "engine api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn start_run_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match parse_body::<StartRunRequest>(&body) {
        Ok(request) => request,
        Err(resp) => return resp,
    };
    match state.engine.start_run(request).await {
        Ok(started) => {
            state.engine.spawn_process(started.run_id);
            Json(started).into_response()
        }
        Err(err) => engine_error(err),
    }
}

async fn evaluate_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match parse_body::<StartRunRequest>(&body) {
        Ok(request) => request,
        Err(resp) => return resp,
    };
    match state.engine.start_evaluation_only_run(request).await {
        Ok(started) => {
            state.engine.spawn_process(started.run_id);
            Json(started).into_response()
        }
        Err(err) => engine_error(err),
    }
}

async fn enrich_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let body = match parse_body::<EnrichBody>(&body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let domain = body.domain.unwrap_or_default();
    match state.engine.spawn_enrichment(&domain, body.event_prompt_id).await {
        Ok((run_id, _handle)) => Json(json!({ "runId": run_id, "ok": true })).into_response(),
        Err(err) => engine_error(err),
    }
}

async fn ingest_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let bundle = match parse_body::<IngestBundle>(&body) {
        Ok(bundle) => bundle,
        Err(resp) => return resp,
    };
    match state.engine.ingest(bundle).await {
        Ok(summary) => Json(json!({
            "ok": true,
            "customers": summary.accounts,
            "opportunities": summary.opportunities,
            "externalEvents": summary.events,
            "telemetry": summary.telemetry,
        }))
        .into_response(),
        Err(err) => engine_error(err),
    }
}

async fn run_status_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.engine.get_run_status(run_id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => engine_error(err),
    }
}

async fn run_log_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(run_id): AxumPath<String>,
    Query(params): Query<LogParams>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let query = match log_query(&params) {
        Ok(query) => query,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };
    match state.engine.read_log(run_id, query).await {
        Ok(page) => Json(json!({
            "runId": run_id,
            "entries": page.entries,
            "hasMore": page.has_more,
        }))
        .into_response(),
        Err(err) => engine_error(err),
    }
}

async fn resume_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.engine.resume_run(run_id).await {
        Ok(_) => Json(json!({ "ok": true })).into_response(),
        Err(err) => engine_error(err),
    }
}

async fn export_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(run_id): AxumPath<String>,
) -> Response {
    let run_id = match parse_run_id(&run_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.engine.export_csv(run_id).await {
        Ok((filename, csv)) => (
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            csv,
        )
            .into_response(),
        Err(err) => engine_error(err),
    }
}

async fn customers_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.list_accounts().await {
        Ok(customers) => Json(json!({ "customers": customers })).into_response(),
        Err(err) => engine_error(err),
    }
}

async fn prompts_handler(State(state): State<Arc<AppState>>) -> Response {
    let catalog = state.engine.prompt_catalog();
    let events: Vec<ApiPrompt> = catalog.events.into_iter().map(ApiPrompt::from).collect();
    let evaluation: Vec<ApiPrompt> = catalog
        .evaluation
        .into_iter()
        .map(ApiPrompt::from)
        .collect();
    Json(json!({
        "eventPrompts": events,
        "evaluationPrompts": evaluation,
    }))
    .into_response()
}

/// An empty body reads as the type's default.
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {err}"))
    })
}

fn parse_run_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("invalid run id `{raw}`")))
}

fn number<T: FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, String> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| format!("{name} must be a number")),
    }
}

/// `tail` wins over `since`/`limit`. Page sizes are clamped by the run log.
fn log_query(params: &LogParams) -> Result<LogQuery, String> {
    if let Some(count) = number::<usize>("tail", params.tail.as_deref())? {
        return Ok(LogQuery::Tail { count });
    }
    let seq = number::<i64>("since", params.since.as_deref())?.unwrap_or(0);
    let limit = number::<usize>("limit", params.limit.as_deref())?.unwrap_or(MAX_LOG_PAGE);
    Ok(LogQuery::Since { seq, limit })
}

fn engine_error(err: EngineError) -> Response {
    let status = match &err {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "engine request failed");
    }
    error_response(status, err.to_string())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use chrono::NaiveDate;
    use expansion_adapters::{
        CompletionRequest, DisabledSearch, LanguageModel, PageFetcher, PromptLibrary,
    };
    use expansion_core::Account;
    use expansion_storage::{FetchError, FetchedResponse, MemoryStore};
    use expansion_sync::{EngineParts, EngineSettings};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct NoPages;

    #[async_trait]
    impl PageFetcher for NoPages {
        async fn get(&self, _url: &str) -> Result<FetchedResponse, FetchError> {
            Err(FetchError::Closed)
        }
    }

    struct SteadyModel;

    #[async_trait]
    impl LanguageModel for SteadyModel {
        fn model_name(&self) -> &str {
            "steady"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            Ok(r#"{"expansion_score": 90, "risk_score": 5, "recommended_motion": "EXPAND",
                "evidence_used": [], "why_now": "Seats, full", "reasoning": "Growing."}"#
                .into())
        }
    }

    async fn engine() -> (Engine, tempfile::TempDir) {
        let prompts = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(prompts.path().join("events")).unwrap();
        std::fs::write(prompts.path().join("events/Hiring_focus.md"), "find hires").unwrap();

        let engine = Engine::new(
            EngineParts {
                store: Arc::new(MemoryStore::new()),
                search: Arc::new(DisabledSearch),
                pages: Arc::new(NoPages),
                model: Arc::new(SteadyModel),
                prompts: PromptLibrary::new(prompts.path()),
            },
            EngineSettings {
                today: NaiveDate::from_ymd_opt(2025, 6, 15),
                ..EngineSettings::default()
            },
        );
        engine
            .ingest(IngestBundle {
                accounts: vec![Account {
                    account_id: "A1".into(),
                    domain: "acme.com".into(),
                    account_name: "Acme".into(),
                    website: None,
                    arr: Some(120_000.0),
                    renewal_date: None,
                    segment: None,
                    status: None,
                    licensed_seats: None,
                    extra: Default::default(),
                    last_enriched_at: None,
                    last_enrichment_run_id: None,
                }],
                ..IngestBundle::default()
            })
            .await
            .unwrap();
        (engine, prompts)
    }

    fn get_req(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unknown_run_is_404_and_bad_ids_are_400() {
        let (engine, _dir) = engine().await;
        let app = app(AppState::new(engine));

        let resp = app
            .clone()
            .oneshot(get_req(&format!("/api/engine/run/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(json_body(resp).await["error"].as_str().unwrap().contains("not found"));

        let resp = app.oneshot(get_req("/api/engine/run/not-a-uuid")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn enrich_validates_domain() {
        let (engine, _dir) = engine().await;
        let app = app(AppState::new(engine));

        let resp = app
            .clone()
            .oneshot(post_req("/api/engine/enrich", r#"{"domain": "  "}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(post_req("/api/engine/enrich", r#"{"domain": "initech.com"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .oneshot(post_req("/api/engine/enrich", r#"{"domain": "ACME.com"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["ok"], true);
        assert!(body["runId"].is_string());
    }

    #[tokio::test]
    async fn log_params_must_be_numeric() {
        let (engine, _dir) = engine().await;
        let (run_id, handle) = engine.spawn_enrichment("acme.com", None).await.unwrap();
        handle.await.unwrap();
        let app = app(AppState::new(engine));

        let resp = app
            .clone()
            .oneshot(get_req(&format!("/api/engine/run/{run_id}/log?since=abc")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(get_req(&format!("/api/engine/run/{run_id}/log?tail=2")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["entries"].as_array().unwrap().len(), 2);
        assert_eq!(body["hasMore"], true);
        assert_eq!(body["runId"], run_id.to_string());
    }

    #[tokio::test]
    async fn completed_run_exports_csv_attachment() {
        let (engine, _dir) = engine().await;
        let started = engine
            .start_evaluation_only_run(StartRunRequest::default())
            .await
            .unwrap();
        engine.process_run(started.run_id).await.unwrap();
        let app = app(AppState::new(engine));

        let resp = app
            .clone()
            .oneshot(get_req(&format!("/api/engine/run/{}/export", started.run_id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"expansion_signal_report_2025-05-01.csv\""
        );
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(csv.starts_with("account_name,domain,arr"));
        assert!(csv.contains("\"Seats, full\""));

        let resp = app
            .oneshot(get_req(&format!("/api/engine/run/{}", started.run_id)))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["export_rows"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listings_expose_customers_and_prompts() {
        let (engine, _dir) = engine().await;
        let app = app(AppState::new(engine));

        let body = json_body(app.clone().oneshot(get_req("/api/engine/customers")).await.unwrap()).await;
        assert_eq!(body["customers"][0]["domain"], "acme.com");
        assert_eq!(body["customers"][0]["account_name"], "Acme");

        let body = json_body(app.oneshot(get_req("/api/engine/prompts")).await.unwrap()).await;
        assert_eq!(body["eventPrompts"][0]["id"], "events/Hiring_focus");
        assert_eq!(body["eventPrompts"][0]["name"], "Hiring focus");
        assert_eq!(body["evaluationPrompts"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn ingest_accepts_bundle_json() {
        let (engine, _dir) = engine().await;
        let app = app(AppState::new(engine));
        let resp = app
            .oneshot(post_req(
                "/api/engine/ingest",
                r#"{"accounts": [{"account_id": "B1", "domain": "www.Globex.com", "account_name": "Globex"}]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["customers"], 1);
        assert_eq!(body["externalEvents"], 0);
    }
}
