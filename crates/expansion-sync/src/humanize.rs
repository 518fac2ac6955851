//! One-line operator renderings of run log entries.

use expansion_core::{LogLevel, RunLogEntry, RunStep};
use serde_json::{Map, Value};

const SHORT_URL_LEN: usize = 50;

fn plural(n: u64, one: &str, many: &str) -> String {
    if n == 1 {
        one.to_string()
    } else {
        many.to_string()
    }
}

fn s(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn num(detail: &Map<String, Value>, key: &str) -> u64 {
    detail
        .get(key)
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
        .unwrap_or(0)
}

fn text(detail: &Map<String, Value>, key: &str) -> String {
    match detail.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn grouped(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn short_url(url: &str) -> String {
    if url.chars().count() > SHORT_URL_LEN {
        let head: String = url.chars().take(SHORT_URL_LEN - 3).collect();
        format!("{head}...")
    } else {
        url.to_string()
    }
}

fn by_step(entry: &RunLogEntry, detail: &Map<String, Value>) -> Option<String> {
    let message = entry.message.as_str();
    let for_domain = entry
        .domain
        .as_deref()
        .map(|d| format!(" for {d}"))
        .unwrap_or_default();

    match entry.step? {
        RunStep::ExternalEvents if message == "External events enrichment started" => {
            let count = num(detail, "domainCount");
            let max = num(detail, "maxDomains");
            let cap = if max > 0 { format!(" (max {max})") } else { String::new() };
            Some(format!(
                "Starting external events enrichment for {count} domain{}{cap}.",
                s(count)
            ))
        }
        RunStep::ExternalEvents if message == "External events enrichment finished" => {
            let domains = num(detail, "domainsProcessed");
            let events = num(detail, "eventsStored");
            Some(format!(
                "Enrichment finished: {domains} domain{} processed, {events} event{} stored.",
                s(domains),
                s(events)
            ))
        }
        RunStep::ExternalEventsQueryBuilder if message.starts_with("Queries built for ") => {
            let count = num(detail, "count");
            Some(format!(
                "Built {count} search {}{for_domain}.",
                plural(count, "query", "queries")
            ))
        }
        RunStep::ExternalEventsSearch if message.starts_with("Search query: ") => {
            let query = text(detail, "query");
            let query = if query.is_empty() { query } else { format!(" \"{query}\"") };
            let results = num(detail, "resultCount");
            Some(format!(
                "Searched for {}{query}: found {results} result{}.",
                text(detail, "category"),
                s(results)
            ))
        }
        RunStep::ExternalEventsSearch if message.starts_with("Search results for ") => {
            let urls = num(detail, "urlCount");
            Some(format!("Found {urls} article{}{for_domain}.", s(urls)))
        }
        RunStep::ExternalEventsFetch if message == "Article fetch" => {
            let url = short_url(&text(detail, "url"));
            let reason = text(detail, "reason");
            if reason.is_empty() {
                Some(format!("Fetched article: {} - {url}", text(detail, "status")))
            } else {
                Some(format!("Skipped article ({reason}): {url}"))
            }
        }
        RunStep::ExternalEventsExtract if message == "LLM extract input" => Some(format!(
            "Extracting events from article ({} chars).",
            grouped(num(detail, "articleTextLength"))
        )),
        RunStep::ExternalEventsExtract if message == "LLM extract output" => {
            let events = detail
                .get("events")
                .and_then(|v| v.as_array())
                .map(|a| a.len() as u64)
                .unwrap_or(0);
            Some(format!("Extracted {events} event{} from article.", s(events)))
        }
        RunStep::ExternalEventsExtract if message.starts_with("Article extracted: ") => {
            let extracted = num(detail, "eventsExtracted");
            Some(format!(
                "Article done: {extracted} event{} extracted, {} stored.",
                s(extracted),
                num(detail, "eventsStored")
            ))
        }
        RunStep::ExternalEventsDedupeStore if message == "Dedupe skip" => {
            let reason = text(detail, "reason");
            let reason = if reason.is_empty() { "already stored".to_string() } else { reason };
            Some(format!(
                "Skipped duplicate event ({reason}): {} at {}",
                text(detail, "event_type"),
                text(detail, "event_ts")
            ))
        }
        RunStep::ExternalEventsDedupeStore if message == "Dedupe insert" => Some(format!(
            "Stored new event: {} at {}",
            text(detail, "event_type"),
            text(detail, "event_ts")
        )),
        RunStep::ExternalEventsDedupeStore
            if message.starts_with("Domain ") && message.ends_with(" completed") =>
        {
            let articles = num(detail, "articlesFetched");
            let events = num(detail, "eventsFromDomain");
            Some(format!(
                "Completed{for_domain}: {articles} article{}, {events} event{} stored.",
                s(articles),
                s(events)
            ))
        }
        RunStep::AtomicSignals if message == "Computing atomic signals" => {
            Some("Computing atomic signals.".to_string())
        }
        RunStep::LiftStats if message == "Computing lift stats" => {
            Some("Computing lift stats.".to_string())
        }
        RunStep::LlmEval if message == "LLM evaluation started" => {
            let total = num(detail, "totalCustomers");
            Some(format!("Starting LLM evaluation for {total} customer{}.", s(total)))
        }
        RunStep::LlmEval if message.starts_with("Evaluating ") => Some(format!(
            "Evaluating {}.",
            entry.domain.as_deref().unwrap_or("customer")
        )),
        RunStep::LlmEval if message.starts_with("Done ") => Some(format!(
            "Finished evaluating {}.",
            entry.domain.as_deref().unwrap_or("customer")
        )),
        RunStep::LlmEval if message == "LLM evaluation finished" => Some(format!(
            "LLM evaluation done: {} of {} customers.",
            num(detail, "processedCount"),
            num(detail, "totalCustomers")
        )),
        _ => None,
    }
}

pub fn humanize_entry(entry: &RunLogEntry) -> String {
    let message = entry.message.as_str();
    let passes_through = (entry.level == LogLevel::Warn && message.starts_with("Search failed for"))
        || (entry.level == LogLevel::Error
            && message.starts_with("Domain ")
            && message.contains(" failed:"));
    if passes_through {
        return entry.message.clone();
    }

    let empty = Map::new();
    let detail = entry
        .detail
        .as_ref()
        .and_then(|d| d.as_object())
        .unwrap_or(&empty);
    if let Some(line) = by_step(entry, detail) {
        return line;
    }

    if !message.is_empty() {
        return match &entry.domain {
            Some(domain) => format!("{domain}: {message}"),
            None => entry.message.clone(),
        };
    }

    let for_domain = entry
        .domain
        .as_deref()
        .map(|d| format!(" for {d}"))
        .unwrap_or_default();
    let fallback = match entry.level {
        LogLevel::Error => format!("Error{for_domain}"),
        LogLevel::Warn => format!("Warning{for_domain}"),
        LogLevel::Info => "Info".to_string(),
    };
    if detail.is_empty() {
        fallback
    } else {
        format!("{fallback}: {}", Value::Object(detail.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn entry(level: LogLevel, step: Option<RunStep>, domain: Option<&str>, message: &str, detail: Value) -> RunLogEntry {
        RunLogEntry {
            run_id: Uuid::nil(),
            seq: 1,
            ts: Utc::now(),
            level,
            domain: domain.map(str::to_string),
            step,
            message: message.into(),
            detail: Some(detail),
        }
    }

    #[test]
    fn search_lines_are_rendered() {
        let e = entry(
            LogLevel::Info,
            Some(RunStep::ExternalEventsSearch),
            Some("acme.com"),
            "Search query: layoff",
            json!({ "query": "Acme layoffs", "category": "layoff", "resultCount": 3 }),
        );
        assert_eq!(humanize_entry(&e), "Searched for layoff \"Acme layoffs\": found 3 results.");

        let e = entry(
            LogLevel::Info,
            Some(RunStep::ExternalEventsQueryBuilder),
            Some("acme.com"),
            "Queries built for acme.com",
            json!({ "count": 1 }),
        );
        assert_eq!(humanize_entry(&e), "Built 1 search query for acme.com.");
    }

    #[test]
    fn fetch_lines_shorten_urls() {
        let url = format!("https://news.example.com/{}", "a".repeat(60));
        let e = entry(
            LogLevel::Info,
            Some(RunStep::ExternalEventsFetch),
            Some("acme.com"),
            "Article fetch",
            json!({ "url": url, "status": "skipped", "reason": "pdf" }),
        );
        let line = humanize_entry(&e);
        assert!(line.starts_with("Skipped article (pdf): https://news.example.com/"));
        assert!(line.ends_with("..."));
        assert_eq!(line.len(), "Skipped article (pdf): ".len() + 50);
    }

    #[test]
    fn extract_input_groups_thousands() {
        let e = entry(
            LogLevel::Info,
            Some(RunStep::ExternalEventsExtract),
            None,
            "LLM extract input",
            json!({ "articleTextLength": 12345 }),
        );
        assert_eq!(humanize_entry(&e), "Extracting events from article (12,345 chars).");
    }

    #[test]
    fn failures_pass_through_and_fallbacks_apply() {
        let e = entry(
            LogLevel::Error,
            Some(RunStep::ExternalEvents),
            Some("acme.com"),
            "Domain acme.com failed: boom",
            json!({}),
        );
        assert_eq!(humanize_entry(&e), "Domain acme.com failed: boom");

        let e = entry(LogLevel::Info, Some(RunStep::LlmEval), Some("acme.com"), "Something odd", json!({}));
        assert_eq!(humanize_entry(&e), "acme.com: Something odd");

        let e = entry(LogLevel::Warn, None, Some("acme.com"), "", json!({ "k": 1 }));
        assert_eq!(humanize_entry(&e), "Warning for acme.com: {\"k\":1}");
    }

    #[test]
    fn enrichment_summary_line() {
        let e = entry(
            LogLevel::Info,
            Some(RunStep::ExternalEvents),
            None,
            "External events enrichment finished",
            json!({ "domainsProcessed": 2, "eventsStored": 1 }),
        );
        assert_eq!(humanize_entry(&e), "Enrichment finished: 2 domains processed, 1 event stored.");
    }
}
