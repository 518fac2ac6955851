//! Expansion-signal pipeline: enrichment, signals, lift stats, LLM scoring
//! and export, driven as resumable runs.

pub mod config;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod export;
pub mod humanize;
pub mod ingest;
pub mod judge;
pub mod lift;
pub mod run_log;
pub mod signals;
pub mod snapshot;

pub use config::EngineConfig;
pub use engine::{
    export_csv, run_status, Engine, EngineParts, EngineSettings, PromptCatalog, RunStatusView,
    StartRunRequest, StartedRun,
};
pub use error::{EngineError, EngineResult};
pub use export::{export_filename, to_csv, ExportRow};
pub use humanize::humanize_entry;
pub use ingest::IngestSummary;
pub use run_log::{LogPage, LogQuery, RunLog, MAX_LOG_PAGE};

pub const CRATE_NAME: &str = "expansion-sync";
