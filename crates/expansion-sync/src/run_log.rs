use std::sync::Arc;
use std::time::Duration;

use expansion_core::{LogDraft, LogLevel, RunLogEntry, RunStep};
use expansion_storage::EngineStore;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::EngineResult;

const APPEND_ATTEMPTS: usize = 3;
const APPEND_RETRY_DELAY: Duration = Duration::from_millis(200);

pub const MAX_LOG_PAGE: usize = 500;

/// Optional fields of a log entry.
#[derive(Debug, Clone, Default)]
pub struct LogFields {
    pub domain: Option<String>,
    pub step: Option<RunStep>,
    pub detail: Option<Value>,
}

impl LogFields {
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

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Which slice of a run's log to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogQuery {
    Since { seq: i64, limit: usize },
    Tail { count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogPage {
    pub entries: Vec<RunLogEntry>,
    pub has_more: bool,
}

/// Operator-facing audit trail for runs. Every append is mirrored to
/// `tracing` at the same level.
#[derive(Clone)]
pub struct RunLog {
    store: Arc<dyn EngineStore>,
}

impl RunLog {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self { store }
    }

    /// Appends an entry, retrying transient store failures. Callers whose
    /// progress depends on the entry propagate the final error.
    pub async fn append(
        &self,
        run_id: Uuid,
        level: LogLevel,
        message: impl Into<String>,
        fields: LogFields,
    ) -> EngineResult<RunLogEntry> {
        let draft = LogDraft {
            run_id,
            level,
            domain: fields.domain,
            step: fields.step,
            message: message.into(),
            detail: fields.detail,
        };
        mirror(&draft);

        let mut attempt = 1;
        loop {
            match self.store.append_log(&draft).await {
                Ok(entry) => return Ok(entry),
                Err(err) if attempt < APPEND_ATTEMPTS => {
                    warn!(%run_id, attempt, error = %err, "run log append failed, retrying");
                    tokio::time::sleep(APPEND_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(%run_id, error = %err, message = %draft.message, "run log append failed");
                    return Err(err.into());
                }
            }
        }
    }

    // Informational entries: a write that still fails is only traced.
    pub async fn info(&self, run_id: Uuid, message: impl Into<String>, fields: LogFields) {
        let _ = self.append(run_id, LogLevel::Info, message, fields).await;
    }

    pub async fn warn(&self, run_id: Uuid, message: impl Into<String>, fields: LogFields) {
        let _ = self.append(run_id, LogLevel::Warn, message, fields).await;
    }

    pub async fn error(&self, run_id: Uuid, message: impl Into<String>, fields: LogFields) {
        let _ = self.append(run_id, LogLevel::Error, message, fields).await;
    }

    /// Entries in ascending sequence order for either polling mode.
    pub async fn read(&self, run_id: Uuid, query: LogQuery) -> EngineResult<LogPage> {
        match query {
            LogQuery::Since { seq, limit } => {
                let limit = limit.clamp(1, MAX_LOG_PAGE);
                let mut entries = self.store.logs_since(run_id, seq.max(0), limit + 1).await?;
                let has_more = entries.len() > limit;
                entries.truncate(limit);
                Ok(LogPage { entries, has_more })
            }
            LogQuery::Tail { count } => {
                let count = count.clamp(1, MAX_LOG_PAGE);
                let mut entries = self.store.logs_tail(run_id, count + 1).await?;
                let has_more = entries.len() > count;
                entries.truncate(count);
                entries.reverse();
                Ok(LogPage { entries, has_more })
            }
        }
    }
}

fn mirror(draft: &LogDraft) {
    let run_id = draft.run_id;
    let domain = draft.domain.as_deref().unwrap_or("");
    let step = draft.step.map(|s| s.as_str()).unwrap_or("");
    match draft.level {
        LogLevel::Info => info!(%run_id, domain, step, "{}", draft.message),
        LogLevel::Warn => warn!(%run_id, domain, step, "{}", draft.message),
        LogLevel::Error => error!(%run_id, domain, step, "{}", draft.message),
    }
}
