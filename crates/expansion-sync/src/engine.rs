use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Months, NaiveDate, Utc};
use expansion_adapters::{
    build_search_provider, DateRange, IngestBundle, LanguageModel, OpenAiChatModel, PageFetcher,
    PromptKind, PromptLibrary, PromptMeta, SearchProvider, SearchProviderKind,
};
use expansion_core::{
    sanitize_domain, Account, AccountSummary, EnrichmentSummary, LogLevel, Progress, Run, RunConfig,
    RunKind, RunStatus, RunStep,
};
use expansion_storage::{EngineStore, HttpClientConfig, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{
    EngineConfig, DEFAULT_MAX_ARTICLES_PER_DOMAIN, DEFAULT_MAX_DOMAINS, DEFAULT_SEARCH_WINDOW_MONTHS,
};
use crate::enrichment::{EnrichmentLimits, Enricher};
use crate::error::{EngineError, EngineResult};
use crate::export::{export_filename, export_rows, to_csv, ExportRow};
use crate::ingest::{ingest_bundle, IngestSummary};
use crate::judge::Judge;
use crate::lift::compute_lift_stats;
use crate::run_log::{LogFields, LogPage, LogQuery, RunLog};
use crate::signals::compute_atomic_signals;
use crate::snapshot::snapshot_for_run;

const LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// External collaborators the engine drives.
pub struct EngineParts {
    pub store: Arc<dyn EngineStore>,
    pub search: Arc<dyn SearchProvider>,
    pub pages: Arc<dyn PageFetcher>,
    pub model: Arc<dyn LanguageModel>,
    pub prompts: PromptLibrary,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_domains: usize,
    pub max_articles_per_domain: usize,
    pub search_window_months: u32,
    /// Pins the calendar date used for month resolution.
    pub today: Option<NaiveDate>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_domains: DEFAULT_MAX_DOMAINS,
            max_articles_per_domain: DEFAULT_MAX_ARTICLES_PER_DOMAIN,
            search_window_months: DEFAULT_SEARCH_WINDOW_MONTHS,
            today: None,
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_domains: config.max_domains,
            max_articles_per_domain: config.max_articles_per_domain,
            search_window_months: config.search_window_months,
            today: None,
        }
    }
}

/// Options accepted when starting a full or evaluation-only run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    #[serde(default)]
    pub event_prompt_id: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub prompt_version: Option<String>,
    /// 1-based.
    #[serde(default)]
    pub start_row: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRun {
    pub run_id: Uuid,
    pub evaluation_month: NaiveDate,
    pub total_customers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatusView {
    #[serde(flatten)]
    pub run: Run,
    pub enrichment_summary: Option<EnrichmentSummary>,
    /// Present once the run is completed.
    pub export_rows: Option<Vec<ExportRow>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptCatalog {
    pub events: Vec<PromptMeta>,
    pub evaluation: Vec<PromptMeta>,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn EngineStore>,
    search: Arc<dyn SearchProvider>,
    pages: Arc<dyn PageFetcher>,
    model: Arc<dyn LanguageModel>,
    prompts: PromptLibrary,
    settings: EngineSettings,
    log: RunLog,
}

impl Engine {
    pub fn new(parts: EngineParts, settings: EngineSettings) -> Self {
        let log = RunLog::new(parts.store.clone());
        Self {
            store: parts.store,
            search: parts.search,
            pages: parts.pages,
            model: parts.model,
            prompts: parts.prompts,
            settings,
            log,
        }
    }

    /// Wires the HTTP-backed collaborators. Missing credentials fail here.
    pub fn from_config(config: &EngineConfig, store: Arc<dyn EngineStore>) -> EngineResult<Self> {
        let timeout = Duration::from_secs(config.http_timeout_secs);
        let kind = SearchProviderKind::select(
            config.search_provider.as_deref(),
            config.news_api_key.as_deref(),
            config.serper_api_key.as_deref(),
        )?;
        let search = build_search_provider(
            kind,
            config.news_api_key.clone(),
            config.serper_api_key.clone(),
            timeout,
        )?;
        let pages = HttpFetcher::new(HttpClientConfig {
            timeout,
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let mut model = OpenAiChatModel::new(config.openai_api_key.clone(), &config.model, LLM_TIMEOUT)?;
        if let Some(base_url) = &config.llm_base_url {
            model = model.with_base_url(base_url);
        }

        info!(search = search.name(), model = %config.model, "engine configured");
        Ok(Self::new(
            EngineParts {
                store,
                search,
                pages: Arc::new(pages),
                model: Arc::new(model),
                prompts: PromptLibrary::new(&config.prompts_dir),
            },
            EngineSettings::from(config),
        ))
    }

    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    pub fn prompt_catalog(&self) -> PromptCatalog {
        PromptCatalog {
            events: self.prompts.list(PromptKind::Events),
            evaluation: self.prompts.list(PromptKind::Evaluation),
        }
    }

    fn today(&self) -> NaiveDate {
        self.settings.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Latest telemetry month before the current month, else the first day
    /// of the previous month.
    pub async fn resolve_evaluation_month(&self) -> EngineResult<NaiveDate> {
        let today = self.today();
        let month_start = today.with_day(1).unwrap_or(today);
        if let Some(month) = self.store.latest_telemetry_month_before(month_start).await? {
            return Ok(month);
        }
        Ok(month_start
            .checked_sub_months(Months::new(1))
            .unwrap_or(month_start))
    }

    async fn account_slice(&self, start_row: usize) -> EngineResult<Vec<Account>> {
        let accounts = self.store.list_accounts().await?;
        Ok(accounts.into_iter().skip(start_row.max(1) - 1).collect())
    }

    async fn load_run(&self, run_id: Uuid) -> EngineResult<Run> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))
    }

    async fn progress(&self, run: &mut Run, progress: Progress) -> EngineResult<()> {
        run.apply(progress);
        self.store.save_run(run).await?;
        Ok(())
    }

    fn enricher(&self, event_prompt: String) -> Enricher<'_> {
        Enricher {
            store: self.store.as_ref(),
            log: &self.log,
            search: self.search.as_ref(),
            pages: self.pages.as_ref(),
            model: self.model.as_ref(),
            limits: EnrichmentLimits {
                max_domains: self.settings.max_domains,
                max_articles_per_domain: self.settings.max_articles_per_domain,
                search_range: DateRange::trailing_months(
                    self.today(),
                    self.settings.search_window_months,
                ),
            },
            event_prompt,
        }
    }

    /// Creates a run over the account slice, enriches it, then computes
    /// signals and lift stats. Scoring is left to [`Engine::process_run`].
    pub async fn start_run(&self, request: StartRunRequest) -> EngineResult<StartedRun> {
        self.start(request, true).await
    }

    /// Like [`Engine::start_run`] without the enrichment stage.
    pub async fn start_evaluation_only_run(&self, request: StartRunRequest) -> EngineResult<StartedRun> {
        self.start(request, false).await
    }

    async fn start(&self, request: StartRunRequest, enrich: bool) -> EngineResult<StartedRun> {
        let evaluation_month = self.resolve_evaluation_month().await?;
        let start_row = request.start_row.unwrap_or(1).max(1);
        let accounts = self.account_slice(start_row).await?;
        let domains: Vec<String> = accounts.iter().map(|a| a.domain.clone()).collect();

        let (kind, first_step) = if enrich {
            (
                RunKind::Full {
                    start_row,
                    event_prompt_id: request.event_prompt_id,
                    prompt_id: request.prompt_id,
                },
                RunStep::ExternalEventsQueryBuilder,
            )
        } else {
            (
                RunKind::EvaluationOnly {
                    start_row,
                    prompt_id: request.prompt_id,
                },
                RunStep::AtomicSignals,
            )
        };
        let mut run = Run::start(
            evaluation_month,
            request.prompt_version,
            domains.len(),
            first_step,
            RunConfig::new(kind),
        );
        self.store.insert_run(&run).await?;
        info!(run_id = %run.id, %evaluation_month, accounts = domains.len(), enrich, "run started");

        let run_id = run.id;
        let prepared = self
            .prepare(&mut run, &domains, enrich)
            .instrument(info_span!("prepare_run", %run_id))
            .await;
        if let Err(err) = prepared {
            self.fail_run(&mut run, None, format!("Run failed: {err}"), &err).await;
            return Err(err);
        }

        Ok(StartedRun {
            run_id: run.id,
            evaluation_month,
            total_customers: domains.len(),
        })
    }

    async fn prepare(&self, run: &mut Run, domains: &[String], enrich: bool) -> EngineResult<()> {
        if enrich {
            let prompt = self
                .prompts
                .resolve(PromptKind::Events, run.config.kind.event_prompt_id());
            let summary = self.enricher(prompt).run(run, domains).await?;
            run.config.enrichment_summary = Some(summary);
            self.store.save_run(run).await?;
        }

        self.progress(run, Progress::step(RunStep::AtomicSignals)).await?;
        self.log
            .info(run.id, "Computing atomic signals", LogFields::step(RunStep::AtomicSignals))
            .await;
        compute_atomic_signals(self.store.as_ref(), domains, run.evaluation_month).await?;

        self.progress(run, Progress::step(RunStep::LiftStats)).await?;
        self.log
            .info(run.id, "Computing lift stats", LogFields::step(RunStep::LiftStats))
            .await;
        compute_lift_stats(self.store.as_ref()).await?;

        self.progress(run, Progress::step(RunStep::LlmEval)).await
    }

    async fn fail_run(&self, run: &mut Run, domain: Option<&str>, message: String, err: &EngineError) {
        let mut fields = LogFields {
            step: run.current_step.or(Some(RunStep::ExternalEvents)),
            ..LogFields::default()
        }
        .detail(json!({ "error": err.to_string() }));
        if let Some(domain) = domain {
            fields = fields.domain(domain);
        }
        self.log.error(run.id, message, fields).await;

        run.status = RunStatus::Failed;
        run.updated_at = Utc::now();
        if let Err(save_err) = self.store.save_run(run).await {
            error!(run_id = %run.id, error = %save_err, "could not mark run failed");
        }
    }

    /// Scores every account of the run's slice that has no evaluation yet.
    /// The first failing account stops the call and leaves the run running.
    /// A completed run is returned untouched and a failed one is refused.
    pub async fn process_run(&self, run_id: Uuid) -> EngineResult<Run> {
        let mut run = self.load_run(run_id).await?;
        check_scorable(&run)?;
        if run.status == RunStatus::Completed {
            return Ok(run);
        }
        self.evaluate_remaining(&mut run)
            .instrument(info_span!("process_run", %run_id))
            .await?;
        Ok(run)
    }

    /// Continues an interrupted run. A completed run is returned untouched.
    pub async fn resume_run(&self, run_id: Uuid) -> EngineResult<Run> {
        let mut run = self.load_run(run_id).await?;
        check_scorable(&run)?;
        if run.status == RunStatus::Completed {
            return Ok(run);
        }
        self.evaluate_remaining(&mut run)
            .instrument(info_span!("resume_run", %run_id))
            .await?;
        Ok(run)
    }

    async fn evaluate_remaining(&self, run: &mut Run) -> EngineResult<()> {
        let accounts = self.account_slice(run.config.kind.start_row()).await?;
        let total = accounts.len();
        let system_prompt = self
            .prompts
            .resolve(PromptKind::Evaluation, run.config.kind.prompt_id());
        let judge = Judge {
            store: self.store.as_ref(),
            log: &self.log,
            model: self.model.as_ref(),
            system_prompt: &system_prompt,
        };

        run.status = RunStatus::Running;
        run.total_customers = total;
        self.progress(run, Progress::step(RunStep::LlmEval)).await?;
        self.log
            .info(
                run.id,
                "LLM evaluation started",
                LogFields::step(RunStep::LlmEval).detail(json!({ "totalCustomers": total })),
            )
            .await;

        let mut done = self.store.evaluated_domains(run.id).await?;
        for (i, account) in accounts.iter().enumerate() {
            if done.contains(&account.domain) {
                continue;
            }
            let domain = account.domain.as_str();
            self.progress(
                run,
                Progress::step(RunStep::LlmEval)
                    .domain(domain)
                    .substep(format!("Customer {} of {}", i + 1, total)),
            )
            .await?;
            self.log
                .info(
                    run.id,
                    format!("Evaluating {domain}"),
                    LogFields::step(RunStep::LlmEval).domain(domain),
                )
                .await;

            let evaluated = match snapshot_for_run(self.store.as_ref(), run.id, account, run.evaluation_month).await {
                Ok(snapshot) => judge.evaluate(run, &snapshot).await,
                Err(err) => Err(err),
            };
            if let Err(err) = evaluated {
                self.log
                    .error(
                        run.id,
                        format!("Evaluation failed for {domain}: {err}"),
                        LogFields::step(RunStep::LlmEval)
                            .domain(domain)
                            .detail(json!({ "error": err.to_string() })),
                    )
                    .await;
                return Err(err);
            }

            // The log entry must land before the progress pointer moves.
            self.log
                .append(
                    run.id,
                    LogLevel::Info,
                    format!("Done {domain}"),
                    LogFields::step(RunStep::LlmEval).domain(domain),
                )
                .await?;
            done.insert(account.domain.clone());
            run.processed_count = done.len();
            run.last_processed_index = Some(i);
            run.updated_at = Utc::now();
            self.store.save_run(run).await?;
        }

        self.log
            .info(
                run.id,
                "LLM evaluation finished",
                LogFields::step(RunStep::LlmEval).detail(json!({
                    "processedCount": run.processed_count,
                    "totalCustomers": total,
                })),
            )
            .await;
        run.status = RunStatus::Completed;
        self.progress(run, Progress::step(RunStep::Completed)).await
    }

    /// Validates the domain and stores a running enrichment-only run.
    pub async fn create_enrichment_run(
        &self,
        domain: &str,
        event_prompt_id: Option<String>,
    ) -> EngineResult<Run> {
        let domain = sanitize_domain(domain);
        if domain.is_empty() {
            return Err(EngineError::InvalidRequest("domain is required".into()));
        }
        if self.store.get_account(&domain).await?.is_none() {
            return Err(EngineError::AccountNotFound(domain));
        }

        let evaluation_month = self.resolve_evaluation_month().await?;
        let run = Run::start(
            evaluation_month,
            None,
            1,
            RunStep::ExternalEventsQueryBuilder,
            RunConfig::new(RunKind::EnrichmentOnly {
                domain,
                event_prompt_id,
            }),
        );
        self.store.insert_run(&run).await?;
        Ok(run)
    }

    /// Creates the run now and enriches in a background task. The handle may
    /// be dropped.
    pub async fn spawn_enrichment(
        &self,
        domain: &str,
        event_prompt_id: Option<String>,
    ) -> EngineResult<(Uuid, JoinHandle<()>)> {
        let run = self.create_enrichment_run(domain, event_prompt_id).await?;
        let run_id = run.id;
        let engine = self.clone();
        let handle = tokio::spawn(
            async move { engine.finish_enrichment(run).await }
                .instrument(info_span!("enrichment_run", %run_id)),
        );
        Ok((run_id, handle))
    }

    async fn finish_enrichment(&self, mut run: Run) {
        let RunKind::EnrichmentOnly { domain, event_prompt_id } = run.config.kind.clone() else {
            return;
        };
        let prompt = self
            .prompts
            .resolve(PromptKind::Events, event_prompt_id.as_deref());

        let outcome = self.enricher(prompt).run(&mut run, &[domain.clone()]).await;
        let summary = match outcome {
            Ok(summary) => summary,
            Err(err) => {
                self.fail_run(&mut run, Some(&domain), format!("Enrichment failed: {err}"), &err)
                    .await;
                return;
            }
        };

        run.config.enrichment_summary = Some(summary);
        run.status = RunStatus::Completed;
        run.processed_count = 1;
        run.apply(Progress::step(RunStep::Completed));
        if let Err(err) = self.store.save_run(&run).await {
            let err = EngineError::Other(err);
            self.fail_run(&mut run, Some(&domain), format!("Enrichment failed: {err}"), &err)
                .await;
            return;
        }
        if let Err(err) = self
            .store
            .mark_account_enriched(&domain, Utc::now(), run.id)
            .await
        {
            error!(run_id = %run.id, domain = %domain, error = %err, "could not stamp account enrichment");
        }
        info!(run_id = %run.id, domain = %domain, "enrichment run completed");
    }

    /// Scores the run in a background task.
    pub fn spawn_process(&self, run_id: Uuid) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.process_run(run_id).await {
                error!(%run_id, error = %err, "background processing stopped");
            }
        })
    }

    pub async fn get_run_status(&self, run_id: Uuid) -> EngineResult<RunStatusView> {
        run_status(self.store.as_ref(), run_id).await
    }

    pub async fn read_log(&self, run_id: Uuid, query: LogQuery) -> EngineResult<LogPage> {
        self.load_run(run_id).await?;
        self.log.read(run_id, query).await
    }

    pub async fn export_rows(&self, run_id: Uuid) -> EngineResult<Vec<ExportRow>> {
        export_rows(self.store.as_ref(), run_id).await
    }

    /// Download filename and CSV body.
    pub async fn export_csv(&self, run_id: Uuid) -> EngineResult<(String, String)> {
        export_csv(self.store.as_ref(), run_id).await
    }

    pub async fn list_accounts(&self) -> EngineResult<Vec<AccountSummary>> {
        let accounts = self.store.list_accounts().await?;
        Ok(accounts.iter().map(AccountSummary::from).collect())
    }

    pub async fn ingest(&self, bundle: IngestBundle) -> EngineResult<IngestSummary> {
        ingest_bundle(self.store.as_ref(), bundle).await
    }
}

/// Run fields, the decoded enrichment summary and, once completed, the
/// ranked export rows. Needs no external collaborators.
pub async fn run_status(store: &dyn EngineStore, run_id: Uuid) -> EngineResult<RunStatusView> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or(EngineError::RunNotFound(run_id))?;
    let export_rows = if run.status == RunStatus::Completed {
        Some(export_rows(store, run_id).await?)
    } else {
        None
    };
    Ok(RunStatusView {
        enrichment_summary: run.config.enrichment_summary.clone(),
        run,
        export_rows,
    })
}

pub async fn export_csv(store: &dyn EngineStore, run_id: Uuid) -> EngineResult<(String, String)> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or(EngineError::RunNotFound(run_id))?;
    let rows = export_rows(store, run_id).await?;
    Ok((export_filename(run.evaluation_month), to_csv(&rows)))
}

/// Enrichment-only runs have nothing to score and failed runs stay failed.
fn check_scorable(run: &Run) -> EngineResult<()> {
    if let RunKind::EnrichmentOnly { .. } = run.config.kind {
        return Err(EngineError::InvalidRequest(format!(
            "run {} is an enrichment-only run",
            run.id
        )));
    }
    if run.status == RunStatus::Failed {
        return Err(EngineError::InvalidRequest(format!(
            "run {} has failed and cannot be scored",
            run.id
        )));
    }
    Ok(())
}
