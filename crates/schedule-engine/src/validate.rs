//! Structural checks for schedule and settings documents.
//!
//! Run before a document is turned into configuration layers so that a
//! mistyped key or a malformed value is reported with its location instead
//! of surfacing as a failure halfway through a batch. Checks cover shape
//! and value syntax only; whether a venue alias exists or a required
//! attribute is supplied by some other layer is left to resolution.
//!
//! Every issue carries a dotted path into the document
//! (`events.0.startDateTime`, `venueAliases.hq.venueId`) and formats as
//! `path: message`.

use std::fmt;

use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::conflict::OnConflict;
use crate::normalize::{attach_timezone, parse_duration, parse_timezone, SeriesMode};

/// One problem found in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Dot-separated location, empty for the document root.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Top-level keys a schedule document may carry.
const SCHEDULE_KEYS: &[&str] = &["$schema", "options", "defaults", "events"];

/// Keys allowed in a schedule's `options` block.
const OPTION_KEYS: &[&str] = &["onConflict", "seriesMode"];

/// Check a schedule document: `options`, `defaults` and the `events` array.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use schedule_engine::validate::validate_schedule;
///
/// let issues = validate_schedule(&json!({"events": [{"title": "Rust Night"}]}));
/// assert_eq!(issues[0].to_string(), "events.0.startDateTime: is required");
/// ```
pub fn validate_schedule(document: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let Some(root) = document.as_object() else {
        issues.push(ValidationIssue::new("", "must be a JSON object"));
        return issues;
    };

    for key in root.keys() {
        if !SCHEDULE_KEYS.contains(&key.as_str()) {
            issues.push(ValidationIssue::new(key, "is not a recognized key"));
        }
    }

    if let Some(options) = root.get("options") {
        match options.as_object() {
            Some(options) => {
                for (key, value) in options {
                    let path = format!("options.{key}");
                    if OPTION_KEYS.contains(&key.as_str()) {
                        check_attribute(&path, key, value, &mut issues);
                    } else {
                        issues.push(ValidationIssue::new(&path, "is not a recognized option"));
                    }
                }
            }
            None => issues.push(ValidationIssue::new("options", "must be an object")),
        }
    }

    if let Some(defaults) = root.get("defaults") {
        check_attributes("defaults", defaults, &mut issues);
    }

    match root.get("events") {
        None => issues.push(ValidationIssue::new("events", "is required")),
        Some(Value::Array(events)) => {
            for (index, event) in events.iter().enumerate() {
                check_event(&format!("events.{index}"), event, &mut issues);
            }
        }
        Some(_) => issues.push(ValidationIssue::new("events", "must be an array")),
    }

    issues
}

/// Check a project or user settings document.
///
/// Attribute keys are checked at the top level and inside `defaults` and
/// each `series.<name>` block. `venueAliases` entries must be an id or an
/// object with a `venueId`; each `groups.<urlname>` must be an object whose
/// optional `timezone` is a known zone. Other keys are left alone.
pub fn validate_settings(document: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let Some(root) = document.as_object() else {
        issues.push(ValidationIssue::new("", "must be a JSON object"));
        return issues;
    };

    for (key, value) in root {
        match key.as_str() {
            "defaults" => check_attributes("defaults", value, &mut issues),
            "venueAliases" => check_venue_aliases(value, &mut issues),
            "groups" => check_groups(value, &mut issues),
            "series" => match value.as_object() {
                Some(series) => {
                    for (name, block) in series {
                        check_attributes(&format!("series.{name}"), block, &mut issues);
                    }
                }
                None => issues.push(ValidationIssue::new("series", "must be an object")),
            },
            _ => check_attribute(key, key, value, &mut issues),
        }
    }

    issues
}

// ── Events and attribute blocks ─────────────────────────────────────────────

fn check_event(path: &str, event: &Value, issues: &mut Vec<ValidationIssue>) {
    let Some(fields) = event.as_object() else {
        issues.push(ValidationIssue::new(path, "must be an object"));
        return;
    };
    for required in ["title", "startDateTime"] {
        if !fields.contains_key(required) {
            issues.push(ValidationIssue::new(&format!("{path}.{required}"), "is required"));
        }
    }
    check_fields(path, fields, issues);
}

fn check_attributes(path: &str, block: &Value, issues: &mut Vec<ValidationIssue>) {
    match block.as_object() {
        Some(fields) => check_fields(path, fields, issues),
        None => issues.push(ValidationIssue::new(path, "must be an object")),
    }
}

fn check_fields(path: &str, fields: &Map<String, Value>, issues: &mut Vec<ValidationIssue>) {
    for (key, value) in fields {
        check_attribute(&format!("{path}.{key}"), key, value, issues);
    }
}

/// Check one known attribute. Unknown keys pass through untouched.
fn check_attribute(path: &str, key: &str, value: &Value, issues: &mut Vec<ValidationIssue>) {
    let problem = match key {
        "title" | "groupUrlname" | "description" | "question" | "howToFindUs" | "eventUrl"
        | "series" | "titleTemplate" | "defaultTime" => expect_string(value),
        "startDateTime" => match value.as_str() {
            Some(text) if attach_timezone(text, Tz::UTC).is_ok() => None,
            Some(_) => Some("must be a date-time like 2025-01-09T18:30:00".to_string()),
            None => Some("must be a string".to_string()),
        },
        "timezone" => match value.as_str() {
            Some(name) if parse_timezone(name).is_ok() => None,
            Some(name) => Some(format!("'{name}' is not a known timezone")),
            None => Some("must be a string".to_string()),
        },
        "duration" => parse_duration(value)
            .err()
            .map(|_| "must be a positive number of minutes or a duration like 2h30m".to_string()),
        "venue" | "featuredPhotoId" => expect_id(value),
        "publishStatus" => match value.as_str() {
            Some(status) if ["DRAFT", "PUBLISHED"].contains(&status.to_uppercase().as_str()) => None,
            _ => Some("must be one of DRAFT, PUBLISHED".to_string()),
        },
        "onConflict" => match value.as_str().map(str::parse::<OnConflict>) {
            Some(Ok(_)) => None,
            _ => Some("must be one of error, skip, update, prompt".to_string()),
        },
        "seriesMode" => match value.as_str().map(str::parse::<SeriesMode>) {
            Some(Ok(_)) => None,
            _ => Some("must be one of link, independent".to_string()),
        },
        "rsvpSettings" => (!value.is_object()).then(|| "must be an object".to_string()),
        "selfRsvp" | "isOnline" => (!value.is_boolean()).then(|| "must be a boolean".to_string()),
        "eventHosts" => match value.as_array() {
            Some(hosts) => hosts
                .iter()
                .position(|host| expect_id(host).is_some())
                .map(|index| format!("entry {index} must be a string or a number")),
            None => Some("must be an array".to_string()),
        },
        _ => None,
    };
    if let Some(message) = problem {
        issues.push(ValidationIssue::new(path, message));
    }
}

fn expect_string(value: &Value) -> Option<String> {
    (!value.is_string()).then(|| "must be a string".to_string())
}

fn expect_id(value: &Value) -> Option<String> {
    match value {
        Value::String(_) | Value::Number(_) => None,
        _ => Some("must be a string or a number".to_string()),
    }
}

// ── Settings tables ─────────────────────────────────────────────────────────

fn check_venue_aliases(value: &Value, issues: &mut Vec<ValidationIssue>) {
    let Some(aliases) = value.as_object() else {
        issues.push(ValidationIssue::new("venueAliases", "must be an object"));
        return;
    };
    for (alias, entry) in aliases {
        let path = format!("venueAliases.{alias}");
        match entry {
            Value::String(_) | Value::Number(_) => {}
            Value::Object(fields) => match fields.get("venueId") {
                Some(id) => {
                    if let Some(message) = expect_id(id) {
                        issues.push(ValidationIssue::new(&format!("{path}.venueId"), message));
                    }
                }
                None => issues.push(ValidationIssue::new(&format!("{path}.venueId"), "is required")),
            },
            _ => issues.push(ValidationIssue::new(&path, "must be a venue id or an object with venueId")),
        }
    }
}

fn check_groups(value: &Value, issues: &mut Vec<ValidationIssue>) {
    let Some(groups) = value.as_object() else {
        issues.push(ValidationIssue::new("groups", "must be an object"));
        return;
    };
    for (urlname, group) in groups {
        let path = format!("groups.{urlname}");
        match group.as_object() {
            Some(fields) => {
                if let Some(timezone) = fields.get("timezone") {
                    check_attribute(&format!("{path}.timezone"), "timezone", timezone, issues);
                }
            }
            None => issues.push(ValidationIssue::new(&path, "must be an object")),
        }
    }
}
