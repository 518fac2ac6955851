use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_EVENT_PROMPT_ID: &str = "events/ExpansionEventsV2";
pub const DEFAULT_EVALUATION_PROMPT_ID: &str = "evaluation/ExpansionEvaluationV2";

const FALLBACK_EVENT_PROMPT: &str =
    "You extract structured events from article text. Return JSON: { events: [] }.";
const FALLBACK_EVALUATION_PROMPT: &str = "You score B2B customer accounts for expansion and \
     risk from the JSON context you are given. Return JSON with expansion_score, risk_score, \
     recommended_motion, evidence_used, why_now and reasoning.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Events,
    Evaluation,
}

impl PromptKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            PromptKind::Events => "events",
            PromptKind::Evaluation => "evaluation",
        }
    }

    fn default_id(&self) -> &'static str {
        match self {
            PromptKind::Events => DEFAULT_EVENT_PROMPT_ID,
            PromptKind::Evaluation => DEFAULT_EVALUATION_PROMPT_ID,
        }
    }

    fn fallback(&self) -> &'static str {
        match self {
            PromptKind::Events => FALLBACK_EVENT_PROMPT,
            PromptKind::Evaluation => FALLBACK_EVALUATION_PROMPT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMeta {
    pub id: String,
    pub name: String,
}

/// Markdown prompts on disk: `<root>/events/*.md`, `<root>/evaluation/*.md`
/// and legacy files directly under `<root>`.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    root: PathBuf,
}

impl PromptLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list(&self, kind: PromptKind) -> Vec<PromptMeta> {
        list_dir(&self.root.join(kind.dir_name()), Some(kind.dir_name()))
    }

    pub fn list_root(&self) -> Vec<PromptMeta> {
        list_dir(&self.root, None)
    }

    /// Prompt text for a composite (`events/Name`) or bare id.
    pub fn get(&self, id: &str) -> Option<String> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }

        if let Some((prefix, name)) = id.split_once('/') {
            if !matches!(prefix, "events" | "evaluation") || !is_safe_name(name) {
                return None;
            }
            return read_prompt(&self.root.join(prefix).join(format!("{name}.md")));
        }

        if !is_safe_name(id) {
            return None;
        }
        let file = format!("{id}.md");
        [
            self.root.join(&file),
            self.root.join("events").join(&file),
            self.root.join("evaluation").join(&file),
        ]
        .iter()
        .find_map(|path| read_prompt(path))
    }

    /// The requested prompt, else the kind's default file, else a built-in text.
    pub fn resolve(&self, kind: PromptKind, id: Option<&str>) -> String {
        if let Some(text) = id.and_then(|id| self.get(id)) {
            return text;
        }
        if let Some(id) = id {
            debug!(prompt_id = id, "prompt not found, using default");
        }
        self.get(kind.default_id())
            .unwrap_or_else(|| kind.fallback().to_string())
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn read_prompt(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

fn display_name(stem: &str) -> String {
    let spaced = stem
        .split(['-', '_'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn list_dir(dir: &Path, prefix: Option<&str>) -> Vec<PromptMeta> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut prompts: Vec<PromptMeta> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            let id = match prefix {
                Some(prefix) => format!("{prefix}/{stem}"),
                None => stem.clone(),
            };
            Some(PromptMeta {
                id,
                name: display_name(&stem),
            })
        })
        .collect();
    prompts.sort_by(|a, b| a.id.cmp(&b.id));
    prompts
}
