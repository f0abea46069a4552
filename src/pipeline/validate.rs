//! Model output → [`AnalysisResult`].
//!
//! Models wrap their JSON in prose or markdown fences often enough that the
//! object is located by scanning for the first balanced `{…}` rather than by
//! parsing the whole response. Validation runs to completion before anything
//! is built, so the caller sees every broken rule at once and never gets a
//! half-populated result.

use crate::error::{DocScanError, Violation};
use crate::output::{AnalysisResult, DocumentType, Entity, EntityType};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// Extract, validate and normalize the model's answer.
///
/// # Errors
/// - [`DocScanError::Parse`] when no JSON object can be recovered
/// - [`DocScanError::Validation`] listing every schema violation
pub fn validate_response(raw: &str) -> Result<AnalysisResult, DocScanError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| DocScanError::Parse("no JSON object found in response".into()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| DocScanError::Parse(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| DocScanError::Parse("top-level JSON value is not an object".into()))?;

    let mut violations = Vec::new();

    let title = non_empty_string(obj, "title", "title", &mut violations);
    let content = non_empty_string(obj, "content", "content", &mut violations);
    let document_type = non_empty_string(obj, "document_type", "document_type", &mut violations)
        .and_then(|s| match DocumentType::parse(&s.to_ascii_lowercase()) {
            Some(t) => Some(t),
            None => {
                violations.push(Violation::new(
                    "document_type",
                    format!("must be one of {}", list(DocumentType::ALL.map(|t| t.as_str()))),
                ));
                None
            }
        });
    let entities = entities(obj, &mut violations);

    if !violations.is_empty() {
        debug!("Response rejected with {} violations", violations.len());
        return Err(DocScanError::Validation { violations });
    }

    // Every Option is Some once `violations` is empty.
    match (title, content, document_type, entities) {
        (Some(title), Some(content), Some(document_type), Some(entities)) => Ok(AnalysisResult {
            document_type,
            title,
            content,
            entities,
        }),
        _ => Err(DocScanError::Internal(
            "validation passed with missing fields".into(),
        )),
    }
}

/// The first balanced `{…}` in `raw`, skipping braces inside JSON strings.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=start + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Trimmed, non-empty string at `key`; records a violation under `path` otherwise.
fn non_empty_string(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    violations: &mut Vec<Violation>,
) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::String(_)) => {
            violations.push(Violation::new(path, "must be a non-empty string"));
            None
        }
        Some(_) => {
            violations.push(Violation::new(path, "must be a string"));
            None
        }
        None => {
            violations.push(Violation::new(path, "is required"));
            None
        }
    }
}

fn entities(obj: &Map<String, Value>, violations: &mut Vec<Violation>) -> Option<Vec<Entity>> {
    let items = match obj.get("entities") {
        Some(Value::Array(items)) => items,
        Some(_) => {
            violations.push(Violation::new("entities", "must be an array"));
            return None;
        }
        None => {
            violations.push(Violation::new("entities", "is required"));
            return None;
        }
    };

    let before = violations.len();
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(entity) = item.as_object() else {
            violations.push(Violation::new(format!("entities[{i}]"), "must be an object"));
            continue;
        };
        let name = non_empty_string(entity, "name", &format!("entities[{i}].name"), violations);
        let type_path = format!("entities[{i}].type");
        let entity_type = non_empty_string(entity, "type", &type_path, violations).and_then(|s| {
            let parsed = EntityType::parse(&s.to_ascii_lowercase());
            if parsed.is_none() {
                violations.push(Violation::new(
                    type_path.as_str(),
                    format!("must be one of {}", list(EntityType::ALL.map(|t| t.as_str()))),
                ));
            }
            parsed
        });

        if let (Some(name), Some(entity_type)) = (name, entity_type) {
            let date = match entity_type {
                EntityType::Date => normalize_date(&name),
                _ => None,
            };
            out.push(Entity {
                name,
                entity_type,
                date,
            });
        }
    }

    (violations.len() == before).then_some(out)
}

fn list<const N: usize>(names: [&str; N]) -> String {
    names.join(", ")
}

// ── Date normalization ───────────────────────────────────────────────────

const DAY_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%d %B, %Y",
];

const MONTH_FORMATS: &[&str] = &["%d %B %Y", "%d %b %Y"];

static RE_ORDINAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2})(?:st|nd|rd|th)\b").unwrap());

static RE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").unwrap());

static RE_MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]+)\.? (\d{4})$").unwrap());

/// Parse a date as written in a document into `YYYY-MM-DD`.
///
/// Partial dates resolve to their first day: `"March 1944"` → `1944-03-01`,
/// `"1944"` → `1944-01-01`. Returns `None` when no known format matches.
pub fn normalize_date(raw: &str) -> Option<String> {
    let cleaned = RE_ORDINAL.replace_all(raw.trim(), "$1");
    let s = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let parsed = if let Some(caps) = RE_MONTH_YEAR.captures(&s) {
        let with_day = format!("1 {} {}", &caps[1], &caps[2]);
        MONTH_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(&with_day, fmt).ok())?
    } else if RE_YEAR.is_match(&s) {
        NaiveDate::from_ymd_opt(s.parse().ok()?, 1, 1)?
    } else {
        DAY_FORMATS
            .iter()
            .filter_map(|fmt| NaiveDate::parse_from_str(&s, fmt).ok())
            .find(|date| year_written_in(&s, date))?
    };

    Some(parsed.format("%Y-%m-%d").to_string())
}

/// chrono's `%d` and `%Y` accept short digit runs, so `"March 1944"` can
/// parse as `%B %d %Y` with day 19 and year 44. Only accept a parse whose
/// year appears in the input as a full four-digit number.
fn year_written_in(s: &str, date: &NaiveDate) -> bool {
    let year = format!("{:04}", date.year());
    s.split(|c: char| !c.is_ascii_digit()).any(|run| run == year)
}
