//! Input validation and normalization.
//!
//! Everything here is a pure function over the raw input. Callers run these
//! before touching any store, so a rejected call never leaves a partial write.

use crate::core::error::TaskmeshError;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

pub const MAX_PROMPT_NOTES_CHARS: usize = 5000;

/// The closed set of task and todo states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskmeshError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        TaskStatus::ALL
            .into_iter()
            .find(|s| s.as_str() == trimmed)
            .ok_or_else(|| {
                TaskmeshError::ValidationError(format!(
                    "invalid status '{}': expected one of pending, in_progress, completed, blocked",
                    raw
                ))
            })
    }
}

pub fn status(raw: &str) -> Result<TaskStatus, TaskmeshError> {
    raw.parse()
}

/// Returns the trimmed value, or a validation error naming `field` when it is blank.
pub fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, TaskmeshError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TaskmeshError::ValidationError(format!("{} is required", field)));
    }
    Ok(trimmed)
}

static COLLECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,64}$").unwrap());
static TOOL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,128}$").unwrap());

pub fn collection(name: &str) -> Result<String, TaskmeshError> {
    let name = required("collection", name)?;
    if !COLLECTION_RE.is_match(name) {
        return Err(TaskmeshError::ValidationError(format!(
            "collection '{}' must be 1-64 characters of [A-Za-z0-9_.-]",
            name
        )));
    }
    Ok(name.to_string())
}

pub fn tool_name(name: &str) -> Result<String, TaskmeshError> {
    let name = required("toolName", name)?;
    if !TOOL_NAME_RE.is_match(name) {
        return Err(TaskmeshError::ValidationError(format!(
            "tool name '{}' must be 1-128 characters of [A-Za-z0-9_.-]",
            name
        )));
    }
    Ok(name.to_string())
}

/// Resolves a result limit: absent means `default`, anything else is clamped to `1..=max`.
pub fn limit(requested: Option<i64>, default: usize, max: usize) -> usize {
    match requested {
        None => default.min(max),
        Some(n) => usize::try_from(n.max(1)).unwrap_or(max).min(max),
    }
}

/// Validates and sanitizes human prompt notes.
///
/// Length is measured on the raw input in Unicode scalar values. The stored
/// value is the sanitized form and must not be blank.
pub fn prompt_notes(raw: &str) -> Result<String, TaskmeshError> {
    let len = raw.chars().count();
    if len > MAX_PROMPT_NOTES_CHARS {
        return Err(TaskmeshError::ValidationError(format!(
            "prompt notes exceed {} characters ({})",
            MAX_PROMPT_NOTES_CHARS, len
        )));
    }
    required("promptNotes", raw)?;
    let clean = sanitize_markdown(raw);
    if clean.trim().is_empty() {
        return Err(TaskmeshError::ValidationError(
            "prompt notes are empty after sanitization".to_string(),
        ));
    }
    Ok(clean.trim().to_string())
}

const ALLOWED_TAGS: &[&str] = &[
    "a", "b", "blockquote", "br", "code", "em", "h1", "h2", "h3", "h4", "h5", "h6", "i", "li",
    "ol", "p", "pre", "strong", "ul",
];

// The regex crate has no backreferences, so each dangerous element gets its own pattern.
static DANGEROUS_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "iframe", "object", "embed", "noscript", "textarea"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>|<{tag}\b[^>]*/?>")).unwrap()
        })
        .collect()
});
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<(/?)([A-Za-z][A-Za-z0-9]*)\b([^>]*)>").unwrap());
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});
static MD_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\]\(\s*(?:javascript|vbscript|data)\s*:(?:[^()]|\([^()]*\))*\)").unwrap()
});

fn is_safe_url(url: &str) -> bool {
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    !(compact.starts_with("javascript:")
        || compact.starts_with("vbscript:")
        || compact.starts_with("data:"))
}

/// Strips unsafe markup from user-authored markdown while leaving markdown syntax intact.
///
/// Dangerous elements are removed with their content. A small set of formatting
/// tags survives with attributes dropped, except a safe `href` on links.
/// Markdown links to script URLs are rewritten to `#`.
pub fn sanitize_markdown(raw: &str) -> String {
    let mut out = COMMENT_RE.replace_all(raw, "").into_owned();
    for re in DANGEROUS_BLOCKS.iter() {
        out = re.replace_all(&out, "").into_owned();
    }

    out = TAG_RE
        .replace_all(&out, |caps: &Captures<'_>| {
            let closing = !caps[1].is_empty();
            let name = caps[2].to_ascii_lowercase();
            if !ALLOWED_TAGS.contains(&name.as_str()) {
                return String::new();
            }
            if closing {
                return format!("</{}>", name);
            }
            if name == "a" {
                let href = HREF_RE.captures(&caps[3]).and_then(|h| {
                    h.get(1)
                        .or_else(|| h.get(2))
                        .or_else(|| h.get(3))
                        .map(|m| m.as_str().to_string())
                });
                return match href {
                    Some(url) if is_safe_url(&url) => {
                        format!("<a href=\"{}\">", url.replace('"', "&quot;"))
                    }
                    _ => "<a>".to_string(),
                };
            }
            format!("<{}>", name)
        })
        .into_owned();

    MD_LINK_RE.replace_all(&out, "](#)").into_owned()
}
