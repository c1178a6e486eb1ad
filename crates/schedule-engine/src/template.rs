//! Schedule templates: a list of dates → an editable schedule document.
//!
//! The template carries the caller's defaults block and one event per date
//! with a rendered title and a local `startDateTime`. Feeding the template
//! back in as a schedule file normalizes each event against those defaults.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Time of day used when `defaultTime` is missing or unreadable.
pub fn fallback_time() -> NaiveTime {
    NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default()
}

/// Title used when `titleTemplate` is missing.
pub const FALLBACK_TITLE_TEMPLATE: &str = "Event on {date}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEvent {
    pub title: String,
    pub start_date_time: String,
}

/// A generated schedule document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTemplate {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub defaults: Map<String, Value>,
    pub events: Vec<TemplateEvent>,
}

/// Build a template for `dates`.
///
/// `defaultTime` and `titleTemplate` are consumed from `defaults`; every
/// other key is copied to the template's `defaults` block unchanged.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use serde_json::{json, Map};
/// use schedule_engine::template::build_template;
///
/// let mut defaults = Map::new();
/// defaults.insert("titleTemplate".into(), json!("Rust Night: {month} {year}"));
/// defaults.insert("groupUrlname".into(), json!("rust-nyc"));
///
/// let dates = [NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()];
/// let template = build_template(&dates, defaults);
/// assert_eq!(template.events[0].title, "Rust Night: January 2025");
/// assert_eq!(template.events[0].start_date_time, "2025-01-02T19:00:00");
/// assert!(!template.defaults.contains_key("titleTemplate"));
/// ```
pub fn build_template(dates: &[NaiveDate], mut defaults: Map<String, Value>) -> ScheduleTemplate {
    let time = match defaults.remove("defaultTime") {
        Some(Value::String(text)) => parse_time(&text).unwrap_or_else(|| {
            warn!(default_time = %text, "unreadable defaultTime, using 19:00:00");
            fallback_time()
        }),
        _ => fallback_time(),
    };
    let title_template = match defaults.remove("titleTemplate") {
        Some(Value::String(text)) => text,
        _ => FALLBACK_TITLE_TEMPLATE.to_string(),
    };

    let events = dates
        .iter()
        .map(|date| TemplateEvent {
            title: render_title(&title_template, *date),
            start_date_time: date.and_time(time).format("%Y-%m-%dT%H:%M:%S").to_string(),
        })
        .collect();

    ScheduleTemplate { defaults, events }
}

/// Substitute `{date}`, `{month}`, `{year}`, `{day}` and `{weekday}`.
///
/// Unknown placeholders are left as written.
pub fn render_title(template: &str, date: NaiveDate) -> String {
    let placeholders = [
        ("{date}", date.format("%B %d, %Y").to_string()),
        ("{month}", date.format("%B").to_string()),
        ("{year}", date.format("%Y").to_string()),
        ("{day}", date.format("%d").to_string()),
        ("{weekday}", date.format("%A").to_string()),
    ];
    placeholders
        .iter()
        .fold(template.to_string(), |title, (placeholder, value)| {
            title.replace(*placeholder, value)
        })
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text.trim(), format).ok())
}
