//! Event normalization: raw event + configuration layers → concrete event.
//!
//! Every attribute is resolved through the layer stack with the raw event
//! inserted as an `event` pseudo-layer on top, so a field present on the
//! event always wins over any default. The result has no remaining
//! defaults to apply: duration is in minutes, the venue is an id, and the
//! start/end instants carry their timezone.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::layers::{
    resolve, resolve_venue, AttributeValue, ConfigLayer, LayerKind, LayerStack, EVENT_SCHEMA,
};

/// Event fields exactly as given in the schedule file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEventSpec {
    fields: Map<String, Value>,
}

impl RawEventSpec {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The title if present, for error reports.
    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(Value::as_str)
    }

    fn as_layer(&self) -> ConfigLayer {
        ConfigLayer::of(LayerKind::Event, self.fields.clone())
    }
}

impl From<Map<String, Value>> for RawEventSpec {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PublishStatus {
    Draft,
    Published,
}

/// How generated events relate to a named series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesMode {
    /// Tag each event with its resolved `series` name.
    Link,
    /// Leave events untagged.
    Independent,
}

impl std::str::FromStr for SeriesMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "link" => Ok(SeriesMode::Link),
            "independent" => Ok(SeriesMode::Independent),
            other => Err(EngineError::InvalidAttribute {
                key: "seriesMode".to_string(),
                reason: format!("expected 'link' or 'independent', got '{other}'"),
            }),
        }
    }
}

/// A fully concrete event ready for conflict checks and submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub title: String,
    pub group_urlname: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub duration_minutes: u32,
    /// IANA name of the timezone attached to `start` and `end`.
    pub timezone: String,
    pub venue_id: Option<String>,
    pub publish_status: PublishStatus,
    pub rsvp_settings: Option<Value>,
    pub series_tag: Option<String>,
    pub description: Option<String>,
    pub event_hosts: Vec<String>,
    pub featured_photo_id: Option<String>,
    pub question: Option<String>,
    pub how_to_find_us: Option<String>,
    pub self_rsvp: Option<bool>,
    pub is_online: Option<bool>,
    pub event_url: Option<String>,
}

/// Normalize one raw event against the resolved default layers.
///
/// # Errors
///
/// - [`EngineError::MissingRequiredAttribute`] if `title`, `startDateTime`
///   or `groupUrlname` is defined nowhere
/// - [`EngineError::UnknownVenueAlias`] if the venue reference is unknown
/// - [`EngineError::InvalidDuration`] / [`EngineError::InvalidDateTime`] /
///   [`EngineError::InvalidTimezone`] for malformed values
/// - [`EngineError::InvalidAttribute`] when a field has the wrong type
pub fn normalize(raw: &RawEventSpec, defaults: &LayerStack) -> Result<NormalizedEvent> {
    let event_layer = raw.as_layer();
    let layers = || std::iter::once(&event_layer).chain(defaults);
    let lookup = |key: &str| -> Result<AttributeValue> {
        Ok(resolve(key, layers(), &EVENT_SCHEMA)?.value)
    };

    let title = required_string("title", lookup("title")?)?;
    let group_urlname = required_string("groupUrlname", lookup("groupUrlname")?)?;
    let start_text = required_string("startDateTime", lookup("startDateTime")?)?;

    let duration_minutes = match lookup("duration")? {
        AttributeValue::Set(value) => parse_duration(&value)?,
        AttributeValue::Unset => return Err(EngineError::InvalidDuration("no duration".into())),
    };

    let tz = resolve_timezone(raw, &group_urlname, &lookup)?;
    let start = attach_timezone(&start_text, tz)?;
    let end = start
        .checked_add_signed(Duration::minutes(i64::from(duration_minutes)))
        .ok_or_else(|| {
            EngineError::InvalidDateTime(format!(
                "'{start_text}' plus {duration_minutes} minutes is out of range"
            ))
        })?;

    let venue_id = match lookup("venue")? {
        AttributeValue::Set(Value::String(alias)) => Some(resolve_venue(&alias, layers())?.venue_id),
        AttributeValue::Set(Value::Number(id)) => Some(id.to_string()),
        AttributeValue::Set(other) => return Err(wrong_type("venue", "a string", &other)),
        AttributeValue::Unset => None,
    };

    let publish_status = match optional_string("publishStatus", lookup("publishStatus")?)? {
        None => PublishStatus::Draft,
        Some(status) => match status.to_uppercase().as_str() {
            "DRAFT" => PublishStatus::Draft,
            "PUBLISHED" => PublishStatus::Published,
            _ => {
                return Err(EngineError::InvalidAttribute {
                    key: "publishStatus".to_string(),
                    reason: format!("expected DRAFT or PUBLISHED, got '{status}'"),
                })
            }
        },
    };

    let series_mode = optional_string("seriesMode", lookup("seriesMode")?)?
        .map(|mode| mode.parse::<SeriesMode>())
        .transpose()?
        .unwrap_or(SeriesMode::Independent);
    let series_tag = match series_mode {
        SeriesMode::Link => optional_string("series", lookup("series")?)?,
        SeriesMode::Independent => None,
    };

    let rsvp_settings = match lookup("rsvpSettings")? {
        AttributeValue::Set(value @ Value::Object(_)) => Some(value),
        AttributeValue::Set(other) => return Err(wrong_type("rsvpSettings", "an object", &other)),
        AttributeValue::Unset => None,
    };

    let event_hosts = match lookup("eventHosts")? {
        AttributeValue::Set(Value::Array(hosts)) => hosts
            .iter()
            .map(|host| match host {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(wrong_type("eventHosts", "strings or numbers", other)),
            })
            .collect::<Result<Vec<_>>>()?,
        AttributeValue::Set(other) => return Err(wrong_type("eventHosts", "an array", &other)),
        AttributeValue::Unset => Vec::new(),
    };

    Ok(NormalizedEvent {
        title,
        group_urlname,
        start,
        end,
        duration_minutes,
        timezone: tz.name().to_string(),
        venue_id,
        publish_status,
        rsvp_settings,
        series_tag,
        description: optional_string("description", lookup("description")?)?,
        event_hosts,
        featured_photo_id: optional_id("featuredPhotoId", lookup("featuredPhotoId")?)?,
        question: optional_string("question", lookup("question")?)?,
        how_to_find_us: optional_string("howToFindUs", lookup("howToFindUs")?)?,
        self_rsvp: optional_bool("selfRsvp", lookup("selfRsvp")?)?,
        is_online: optional_bool("isOnline", lookup("isOnline")?)?,
        event_url: optional_string("eventUrl", lookup("eventUrl")?)?,
    })
}

/// Event-level `timezone` first, then `groups.<group>.timezone`, then the
/// general `timezone` default.
fn resolve_timezone(
    raw: &RawEventSpec,
    group_urlname: &str,
    lookup: &dyn Fn(&str) -> Result<AttributeValue>,
) -> Result<Tz> {
    let name = match raw.fields().get("timezone").filter(|v| !v.is_null()) {
        Some(value) => optional_string("timezone", AttributeValue::Set(value.clone()))?,
        None => match optional_string(
            "timezone",
            lookup(&format!("groups.{group_urlname}.timezone"))?,
        )? {
            Some(name) => Some(name),
            None => optional_string("timezone", lookup("timezone")?)?,
        },
    };
    parse_timezone(name.as_deref().unwrap_or("UTC"))
}

// ── Duration ────────────────────────────────────────────────────────────────

/// Parse a duration into minutes.
///
/// Accepts a positive integer (minutes) or a string of the form
/// `^(\d+h)?(\d+m)?$` with at least one component.
///
/// # Errors
///
/// Returns [`EngineError::InvalidDuration`] for malformed, empty, zero or
/// non-positive durations.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use schedule_engine::normalize::parse_duration;
///
/// assert_eq!(parse_duration(&json!("2h30m")).unwrap(), 150);
/// assert_eq!(parse_duration(&json!("90m")).unwrap(), 90);
/// assert_eq!(parse_duration(&json!(120)).unwrap(), 120);
/// assert!(parse_duration(&json!("")).is_err());
/// ```
pub fn parse_duration(value: &Value) -> Result<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .filter(|&m| m >= 1)
            .and_then(|m| u32::try_from(m).ok())
            .ok_or_else(|| EngineError::InvalidDuration(format!("must be a positive number of minutes: {n}"))),
        Value::String(s) => parse_duration_str(s),
        other => Err(EngineError::InvalidDuration(format!(
            "expected minutes or a duration string, got {other}"
        ))),
    }
}

/// Parse the `NhMm` duration grammar into minutes.
pub fn parse_duration_str(s: &str) -> Result<u32> {
    let invalid = || EngineError::InvalidDuration(format!("'{s}'"));

    let mut hours: Option<u32> = None;
    let mut minutes: Option<u32> = None;
    let mut num_buf = String::new();

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
            continue;
        }
        if num_buf.is_empty() {
            return Err(invalid());
        }
        let n: u32 = num_buf.parse().map_err(|_| invalid())?;
        num_buf.clear();
        match ch {
            // Hours must come first and only once
            'h' if hours.is_none() && minutes.is_none() => hours = Some(n),
            'm' if minutes.is_none() => minutes = Some(n),
            _ => return Err(invalid()),
        }
    }

    if !num_buf.is_empty() || (hours.is_none() && minutes.is_none()) {
        return Err(invalid());
    }

    let total = hours
        .unwrap_or(0)
        .checked_mul(60)
        .and_then(|h| h.checked_add(minutes.unwrap_or(0)))
        .ok_or_else(invalid)?;
    if total == 0 {
        return Err(EngineError::InvalidDuration(format!("must be positive: '{s}'")));
    }
    Ok(total)
}

/// Format minutes as `"<h>h<m>m"`, dropping a zero component.
pub fn format_duration(minutes: u32) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h{m}m"),
    }
}

// ── Date and time ───────────────────────────────────────────────────────────

/// Parse an IANA timezone string into `Tz`.
pub fn parse_timezone(s: &str) -> Result<Tz> {
    s.trim()
        .parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(format!("'{s}'")))
}

/// Attach `tz` to a start datetime string.
///
/// RFC 3339 input with an explicit offset keeps its instant and is shown in
/// `tz`. A local `YYYY-MM-DDTHH:MM[:SS]` is read as wall-clock time in `tz`.
/// Ambiguous wall-clock times (DST fall-back) take the earlier instant;
/// times inside a DST gap are rejected.
pub fn attach_timezone(text: &str, tz: Tz) -> Result<DateTime<Tz>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&tz));
    }

    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .ok_or_else(|| EngineError::InvalidDateTime(format!("'{text}'")))?;

    tz.from_local_datetime(&naive).earliest().ok_or_else(|| {
        EngineError::InvalidDateTime(format!(
            "'{text}' does not exist in {} (skipped by a DST transition)",
            tz.name()
        ))
    })
}

// ── Field coercion ──────────────────────────────────────────────────────────

fn wrong_type(key: &str, expected: &str, got: &Value) -> EngineError {
    EngineError::InvalidAttribute {
        key: key.to_string(),
        reason: format!("expected {expected}, got {got}"),
    }
}

fn required_string(key: &str, value: AttributeValue) -> Result<String> {
    match optional_string(key, value)? {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(EngineError::InvalidAttribute {
            key: key.to_string(),
            reason: "must not be empty".to_string(),
        }),
    }
}

fn optional_string(key: &str, value: AttributeValue) -> Result<Option<String>> {
    match value {
        AttributeValue::Set(Value::String(s)) => Ok(Some(s)),
        AttributeValue::Set(other) => Err(wrong_type(key, "a string", &other)),
        AttributeValue::Unset => Ok(None),
    }
}

fn optional_id(key: &str, value: AttributeValue) -> Result<Option<String>> {
    match value {
        AttributeValue::Set(Value::Number(n)) => Ok(Some(n.to_string())),
        other => optional_string(key, other),
    }
}

fn optional_bool(key: &str, value: AttributeValue) -> Result<Option<bool>> {
    match value {
        AttributeValue::Set(Value::Bool(b)) => Ok(Some(b)),
        AttributeValue::Set(other) => Err(wrong_type(key, "a boolean", &other)),
        AttributeValue::Unset => Ok(None),
    }
}
