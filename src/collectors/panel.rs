use crate::error::{Error, Result};
use crate::models::notification::NotificationRecord;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

const NOTIFICATION_CLASS: &str = "phabricator-notification";
const UNREAD_CLASS: &str = "phabricator-notification-unread";

struct Patterns {
    div_open: Regex,
    div_tag:  Regex,
    class:    Regex,
    meta:     Regex,
    anchor:   Regex,
    href:     Regex,
    object:   Regex,
    tag:      Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        div_open: Regex::new(r"<div\b([^>]*)>").expect("valid regex"),
        div_tag:  Regex::new(r"<div\b[^>]*>|</div\s*>").expect("valid regex"),
        class:    Regex::new(r#"\bclass="([^"]*)""#).expect("valid regex"),
        meta:     Regex::new(r#"\bdata-meta="([^"]*)""#).expect("valid regex"),
        anchor:   Regex::new(r"(?s)<a\b([^>]*)>(.*?)</a>").expect("valid regex"),
        href:     Regex::new(r#"\bhref="([^"]*)""#).expect("valid regex"),
        object:   Regex::new(r"^/[A-Z]+[0-9]+$").expect("valid regex"),
        tag:      Regex::new(r"(?s)<[^>]*>").expect("valid regex"),
    })
}

/// Parse a notification panel response into records, newest first.
///
/// The body may carry a non-JSON guard before the envelope (`for (;;);`), so
/// decoding starts at the first `{`. Links are made absolute against `base_url`.
pub fn parse(raw: &str, base_url: &str) -> Result<Vec<NotificationRecord>> {
    let start = raw
        .find('{')
        .ok_or_else(|| Error::Parse("no JSON object in response".into()))?;
    let envelope: Value = serde_json::from_str(&raw[start..])
        .map_err(|e| Error::Parse(e.to_string()))?;

    if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
        return Err(Error::Parse(format!("server reported error: {}", err)));
    }
    let content = envelope["payload"]["content"]
        .as_str()
        .ok_or_else(|| Error::Parse("missing payload.content".into()))?;

    Ok(parse_content(content, base_url))
}

/// Split panel HTML into notification elements and extract one record from each.
fn parse_content(html: &str, base_url: &str) -> Vec<NotificationRecord> {
    let p = patterns();

    let mut openings: Vec<(usize, usize, &str)> = Vec::new();
    for caps in p.div_open.captures_iter(html) {
        let (Some(whole), Some(attrs)) = (caps.get(0), caps.get(1)) else { continue };
        let classes = capture(&p.class, attrs.as_str()).unwrap_or_default();
        if classes.split_whitespace().any(|c| c == NOTIFICATION_CLASS) {
            openings.push((whole.start(), whole.end(), attrs.as_str()));
        }
    }

    let mut records = Vec::with_capacity(openings.len());
    for (i, &(_, body_start, attrs)) in openings.iter().enumerate() {
        let limit = openings.get(i + 1).map(|o| o.0).unwrap_or(html.len());
        let body_end = element_end(html, body_start, limit);
        let body = &html[body_start..body_end];
        match parse_element(attrs, body, base_url) {
            Some(rec) => records.push(rec),
            None      => debug!(index = i, "skipping notification without meta or task link"),
        }
    }
    records
}

/// Offset of the `</div>` that closes an element whose body starts at
/// `body_start`. Unbalanced markup ends the body at `limit`.
fn element_end(html: &str, body_start: usize, limit: usize) -> usize {
    let mut depth = 1usize;
    for m in patterns().div_tag.find_iter(&html[body_start..limit]) {
        if m.as_str().starts_with("</") {
            depth -= 1;
            if depth == 0 {
                return body_start + m.start();
            }
        } else {
            depth += 1;
        }
    }
    limit
}

fn parse_element(attrs: &str, body: &str, base_url: &str) -> Option<NotificationRecord> {
    let p = patterns();
    let classes = capture(&p.class, attrs).unwrap_or_default();
    let unread = classes.split_whitespace().any(|c| c == UNREAD_CLASS);
    let meta = capture(&p.meta, attrs).map(decode_entities)?;

    let anchors: Vec<(String, &str)> = p.anchor.captures_iter(body)
        .filter_map(|caps| {
            let href = capture(&p.href, caps.get(1)?.as_str())?;
            Some((decode_entities(href), caps.get(2)?.as_str()))
        })
        .collect();
    let (href, label) = anchors.iter()
        .find(|(href, _)| p.object.is_match(href))
        .or_else(|| anchors.last())?;

    let task = href.strip_prefix('/').unwrap_or(href).to_string();
    if task.is_empty() { return None; }

    Some(NotificationRecord {
        task,
        meta,
        unread,
        title: plain_text(label),
        text:  plain_text(body),
        link:  absolute_link(base_url, href),
    })
}

fn capture<'h>(re: &Regex, haystack: &'h str) -> Option<&'h str> {
    re.captures(haystack).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn plain_text(html: &str) -> String {
    let stripped = patterns().tag.replace_all(html, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

fn absolute_link(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if href.starts_with('/') {
        format!("{}{}", base, href)
    } else {
        format!("{}/{}", base, href)
    }
}
