use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use expansion_adapters::load_ingest_bundle;
use expansion_storage::{EngineStore, PgStore};
use expansion_sync::ingest::ingest_bundle;
use expansion_sync::{
    export_csv, humanize_entry, run_status, Engine, EngineConfig, LogQuery, RunLog,
    StartRunRequest, MAX_LOG_PAGE,
};
use expansion_web::AppState;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "expansion-cli")]
#[command(about = "Expansion signal engine command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply database migrations.
    Migrate,
    /// Load an ingest bundle (JSON) into the store.
    Ingest { path: PathBuf },
    /// Full run: enrichment, signals, lift stats, then scoring.
    Run(RunArgs),
    /// Evaluation-only run over already stored events.
    Evaluate(RunArgs),
    /// Score the remaining accounts of a run.
    Process { run_id: Uuid },
    /// Continue an interrupted run.
    Resume { run_id: Uuid },
    /// Enrich one account and wait for it to finish.
    Enrich {
        domain: String,
        #[arg(long)]
        event_prompt: Option<String>,
    },
    Status { run_id: Uuid },
    Logs {
        run_id: Uuid,
        #[arg(long, default_value_t = 0)]
        since: i64,
        #[arg(long, default_value_t = MAX_LOG_PAGE)]
        limit: usize,
        #[arg(long, conflicts_with_all = ["since", "limit"])]
        tail: Option<usize>,
        /// One readable sentence per entry.
        #[arg(long)]
        human: bool,
    },
    Accounts,
    Export {
        run_id: Uuid,
        /// Defaults to the report filename in the current directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    event_prompt: Option<String>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    prompt_version: Option<String>,
    /// 1-based row of the first account, in domain order.
    #[arg(long, default_value_t = 1)]
    start_row: usize,
    /// Stop after signals and lift stats.
    #[arg(long)]
    no_process: bool,
}

impl RunArgs {
    fn request(&self) -> StartRunRequest {
        StartRunRequest {
            event_prompt_id: self.event_prompt.clone(),
            prompt_id: self.prompt.clone(),
            prompt_version: self.prompt_version.clone(),
            start_row: Some(self.start_row),
        }
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("expansion=info"))?;
    let json = std::env::var("EXPANSION_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn connect(config: &EngineConfig) -> Result<Arc<dyn EngineStore>> {
    Ok(Arc::new(PgStore::connect(&config.database_url).await?))
}

async fn engine(config: &EngineConfig) -> Result<Engine> {
    let store = connect(config).await?;
    Ok(Engine::from_config(config, store)?)
}

async fn start_and_process(engine: &Engine, args: &RunArgs, enrich: bool) -> Result<()> {
    let started = if enrich {
        engine.start_run(args.request()).await?
    } else {
        engine.start_evaluation_only_run(args.request()).await?
    };
    println!(
        "run started: run_id={} evaluation_month={} customers={}",
        started.run_id, started.evaluation_month, started.total_customers
    );
    if args.no_process {
        return Ok(());
    }
    let run = engine.process_run(started.run_id).await?;
    println!(
        "run {}: run_id={} processed={}/{}",
        run.status, run.id, run.processed_count, run.total_customers
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    match cli.command {
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Ingest { path } => {
            let bundle = load_ingest_bundle(&path)?;
            let store = connect(&config).await?;
            let summary = ingest_bundle(store.as_ref(), bundle).await?;
            println!(
                "ingest complete: accounts={} telemetry={} opportunities={} events={}",
                summary.accounts, summary.telemetry, summary.opportunities, summary.events
            );
        }
        Commands::Run(args) => start_and_process(&engine(&config).await?, &args, true).await?,
        Commands::Evaluate(args) => start_and_process(&engine(&config).await?, &args, false).await?,
        Commands::Process { run_id } => {
            let run = engine(&config).await?.process_run(run_id).await?;
            println!("run {}: processed={}/{}", run.status, run.processed_count, run.total_customers);
        }
        Commands::Resume { run_id } => {
            let run = engine(&config).await?.resume_run(run_id).await?;
            println!("run {}: processed={}/{}", run.status, run.processed_count, run.total_customers);
        }
        Commands::Enrich { domain, event_prompt } => {
            let engine = engine(&config).await?;
            let (run_id, handle) = engine.spawn_enrichment(&domain, event_prompt).await?;
            handle.await?;
            let status = run_status(engine.store().as_ref(), run_id).await?;
            let summary = status.enrichment_summary.unwrap_or_default();
            println!(
                "enrichment {}: run_id={} articles={} events_stored={} errors={}",
                status.run.status,
                run_id,
                summary.articles_fetched,
                summary.events_stored,
                summary.errors.len()
            );
        }
        Commands::Status { run_id } => {
            let store = connect(&config).await?;
            let status = run_status(store.as_ref(), run_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Logs {
            run_id,
            since,
            limit,
            tail,
            human,
        } => {
            let query = match tail {
                Some(count) => LogQuery::Tail { count },
                None => LogQuery::Since { seq: since, limit },
            };
            let page = RunLog::new(connect(&config).await?).read(run_id, query).await?;
            for entry in &page.entries {
                if human {
                    println!("{:>5} {}", entry.seq, humanize_entry(entry));
                } else {
                    println!(
                        "{:>5} {:<5} {:<30} {:<24} {}",
                        entry.seq,
                        entry.level.as_str(),
                        entry.step.map(|s| s.to_string()).unwrap_or_default(),
                        entry.domain.as_deref().unwrap_or("-"),
                        entry.message
                    );
                }
            }
            if page.has_more {
                eprintln!("(more entries available)");
            }
        }
        Commands::Accounts => {
            let store = connect(&config).await?;
            for account in store.list_accounts().await? {
                let enriched = account
                    .last_enriched_at
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "never".into());
                println!("{}\t{}\t{}", account.domain, account.account_name, enriched);
            }
        }
        Commands::Export { run_id, out } => {
            let store = connect(&config).await?;
            let (filename, csv) = export_csv(store.as_ref(), run_id).await?;
            let path = out.unwrap_or_else(|| PathBuf::from(filename));
            std::fs::write(&path, &csv)?;
            println!(
                "export written: {} rows={}",
                path.display(),
                csv.lines().count().saturating_sub(1)
            );
        }
        Commands::Serve { port } => {
            let engine = engine(&config).await?;
            expansion_web::serve(AppState::new(engine), port.unwrap_or(config.web_port)).await?;
        }
    }

    Ok(())
}
