use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use scraper::{ElementRef, Html, Selector};

use crate::{text_or_none, AdapterError};

pub const MAX_ARTICLE_CHARS: usize = 15_000;

const SKIPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "iframe"];

const PUBLISHED_DATE_SELECTORS: [&str; 4] = [
    r#"meta[property="article:published_time"]"#,
    r#"meta[name="date"]"#,
    r#"meta[name="publishdate"]"#,
    "time[datetime]",
];

/// Visible body text with scripts, styles and frames removed, whitespace
/// collapsed and truncated to [`MAX_ARTICLE_CHARS`] characters.
pub fn clean_article_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();

    let body = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next());
    push_visible_text(body.unwrap_or_else(|| document.root_element()), &mut raw);

    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_ARTICLE_CHARS)
        .collect()
}

fn push_visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(el) = ElementRef::wrap(child) {
            if !SKIPPED_TAGS.contains(&el.value().name()) {
                push_visible_text(el, out);
            }
        }
    }
}

/// Publication date from the first matching metadata element. A value that
/// does not parse ends the search.
pub fn extract_published_date(html: &str) -> Result<Option<NaiveDate>, AdapterError> {
    let document = Html::parse_document(html);
    for selector in PUBLISHED_DATE_SELECTORS {
        let sel = Selector::parse(selector).map_err(|e| AdapterError::Message(e.to_string()))?;
        let Some(el) = document.select(&sel).next() else {
            continue;
        };
        let raw = el
            .value()
            .attr("content")
            .or_else(|| el.value().attr("datetime"))
            .and_then(text_or_none);
        if let Some(raw) = raw {
            return Ok(parse_loose_timestamp(&raw).map(|ts| ts.date_naive()));
        }
    }
    Ok(None)
}

/// Accepts RFC 3339, RFC 2822 (HTTP dates), naive `YYYY-MM-DDTHH:MM:SS`
/// and bare `YYYY-MM-DD`. Naive values are read as UTC.
pub fn parse_loose_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_drops_scripts_and_collapses_whitespace() {
        let html = r#"<html><head><title>t</title><style>p{}</style></head>
            <body>
              <script>var x = 1;</script>
              <h1>Acme   names</h1>
              <p>a new   Chief Learning Officer.</p>
              <noscript>enable js</noscript>
              <iframe src="x">frame</iframe>
            </body></html>"#;
        assert_eq!(
            clean_article_html(html),
            "Acme names a new Chief Learning Officer."
        );
    }

    #[test]
    fn cleaning_truncates_long_articles() {
        let html = format!("<body><p>{}</p></body>", "word ".repeat(5_000));
        assert_eq!(clean_article_html(&html).chars().count(), MAX_ARTICLE_CHARS);
    }

    #[test]
    fn published_date_prefers_article_meta() {
        let html = r#"<html><head>
            <meta name="date" content="2024-01-01">
            <meta property="article:published_time" content="2025-03-04T10:00:00+02:00">
            </head><body></body></html>"#;
        assert_eq!(
            extract_published_date(html).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 4)
        );
    }

    #[test]
    fn published_date_falls_back_to_time_element() {
        let html = r#"<body><time datetime="2025-02-10">Feb 10</time></body>"#;
        assert_eq!(
            extract_published_date(html).unwrap(),
            NaiveDate::from_ymd_opt(2025, 2, 10)
        );
        assert_eq!(extract_published_date("<body>nothing</body>").unwrap(), None);
    }

    #[test]
    fn loose_timestamps_cover_http_dates() {
        let ts = parse_loose_timestamp("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(ts.date_naive(), NaiveDate::from_ymd_opt(2015, 10, 21).unwrap());
        assert!(parse_loose_timestamp("2025-06-01T09:30:00").is_some());
        assert!(parse_loose_timestamp("last spring").is_none());
    }
}
