//! Layered configuration resolution with provenance.
//!
//! Attribute values come from several independently loaded sources. Each is
//! wrapped in a read-only [`ConfigLayer`] and resolution picks the first
//! layer, in precedence order, that defines the key. Every answer records
//! which layer supplied it so callers can explain the choice.
//!
//! Standard precedence, highest first:
//!
//! | layer     | priority | source                                     |
//! |-----------|----------|--------------------------------------------|
//! | `event`   | 0        | fields present on the raw event itself     |
//! | `file`    | 10       | schedule file `options` + `defaults`       |
//! | `cli`     | 20       | command-line flags                         |
//! | `project` | 30       | project settings file                      |
//! | `user`    | 40       | user settings file                         |
//! | `builtin` | 50       | [`builtin_defaults`]                       |
//!
//! JSON `null` counts as "not defined" and falls through to the next layer.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{EngineError, Result};

/// The standard configuration sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Event,
    File,
    Cli,
    Project,
    User,
    Builtin,
}

impl LayerKind {
    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Event => "event",
            LayerKind::File => "file",
            LayerKind::Cli => "cli",
            LayerKind::Project => "project",
            LayerKind::User => "user",
            LayerKind::Builtin => "builtin",
        }
    }

    pub fn priority(self) -> i32 {
        match self {
            LayerKind::Event => 0,
            LayerKind::File => 10,
            LayerKind::Cli => 20,
            LayerKind::Project => 30,
            LayerKind::User => 40,
            LayerKind::Builtin => 50,
        }
    }
}

/// One named, prioritized snapshot of attribute values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigLayer {
    name: String,
    priority: i32,
    values: Map<String, Value>,
}

impl ConfigLayer {
    pub fn new(name: impl Into<String>, priority: i32, values: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            priority,
            values,
        }
    }

    /// A layer for one of the standard sources.
    pub fn of(kind: LayerKind, values: Map<String, Value>) -> Self {
        Self::new(kind.name(), kind.priority(), values)
    }

    /// Build a layer from a settings document.
    ///
    /// Entries of a top-level `defaults` object become attribute keys of
    /// their own. Other top-level keys (`venueAliases`, `groups`, ...) are
    /// kept as-is and win over a `defaults` entry of the same name.
    pub fn from_settings(kind: LayerKind, settings: &Value) -> Self {
        let mut values = Map::new();
        if let Some(object) = settings.as_object() {
            for (key, value) in object {
                if key != "defaults" {
                    values.insert(key.clone(), value.clone());
                }
            }
            if let Some(defaults) = object.get("defaults").and_then(Value::as_object) {
                for (key, value) in defaults {
                    values.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        Self::of(kind, values)
    }

    /// Return a copy with `key` set to `value`.
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Return a copy with `key` removed.
    pub fn without(mut self, key: &str) -> Self {
        self.values.remove(key);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a key, trying the literal key first and then a dotted path.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(key) {
            return defined(value);
        }
        if !key.contains('.') {
            return None;
        }
        let segments: Vec<&str> = key.split('.').collect();
        self.lookup_path(&segments)
    }

    /// Walk nested objects segment by segment.
    pub fn lookup_path(&self, segments: &[&str]) -> Option<&Value> {
        let (first, rest) = segments.split_first()?;
        let mut current = self.values.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        defined(current)
    }
}

fn defined(value: &Value) -> Option<&Value> {
    (!value.is_null()).then_some(value)
}

/// An ordered collection of layers, highest precedence first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerStack {
    layers: Vec<ConfigLayer>,
}

impl LayerStack {
    /// Sort `layers` by priority. Equal priorities keep their given order.
    pub fn new(mut layers: Vec<ConfigLayer>) -> Self {
        layers.sort_by_key(ConfigLayer::priority);
        Self { layers }
    }

    /// A new stack with `layer` added in priority position.
    pub fn with_layer(&self, layer: ConfigLayer) -> Self {
        let mut layers = self.layers.clone();
        layers.push(layer);
        Self::new(layers)
    }

    /// A new stack without the layer named `name`.
    pub fn without_layer(&self, name: &str) -> Self {
        Self {
            layers: self
                .layers
                .iter()
                .filter(|layer| layer.name != name)
                .cloned()
                .collect(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConfigLayer> {
        self.layers.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ConfigLayer> {
        self.layers.iter().find(|layer| layer.name == name)
    }
}

impl<'a> IntoIterator for &'a LayerStack {
    type Item = &'a ConfigLayer;
    type IntoIter = std::slice::Iter<'a, ConfigLayer>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}

// ── Resolution ──────────────────────────────────────────────────────────────

/// A resolved attribute, or the explicit absence of one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Set(Value),
    Unset,
}

impl AttributeValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            AttributeValue::Set(value) => Some(value),
            AttributeValue::Unset => None,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, AttributeValue::Set(_))
    }
}

/// Name recorded as the source of an [`AttributeValue::Unset`] result.
pub const UNSET_SOURCE: &str = "unset";

/// The outcome of resolving one key, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedValue {
    pub key: String,
    pub value: AttributeValue,
    pub source_layer: String,
    /// Layer names consulted, in order, up to and including the source.
    pub consulted: Vec<String>,
}

/// Which attributes must resolve to a value.
#[derive(Debug, Clone, Copy)]
pub struct AttributeSchema {
    pub required: &'static [&'static str],
}

impl AttributeSchema {
    pub fn is_required(&self, key: &str) -> bool {
        self.required.contains(&key)
    }
}

/// Attributes every scheduled event needs.
pub const EVENT_SCHEMA: AttributeSchema = AttributeSchema {
    required: &["title", "startDateTime", "groupUrlname"],
};

/// Resolve `key` against `layers`, taken in iteration order as precedence.
///
/// # Errors
///
/// Returns [`EngineError::MissingRequiredAttribute`] when no layer defines a
/// key that `schema` marks required. Optional keys resolve to
/// [`AttributeValue::Unset`] instead.
///
/// # Examples
///
/// ```
/// use serde_json::{json, Map};
/// use schedule_engine::layers::{resolve, ConfigLayer, LayerKind, LayerStack, EVENT_SCHEMA};
///
/// let mut user = Map::new();
/// user.insert("duration".into(), json!("1h"));
/// let mut project = Map::new();
/// project.insert("duration".into(), json!(90));
///
/// let stack = LayerStack::new(vec![
///     ConfigLayer::of(LayerKind::User, user),
///     ConfigLayer::of(LayerKind::Project, project),
/// ]);
/// let resolved = resolve("duration", &stack, &EVENT_SCHEMA).unwrap();
/// assert_eq!(resolved.value.as_value(), Some(&json!(90)));
/// assert_eq!(resolved.source_layer, "project");
/// ```
pub fn resolve<'a, I>(key: &str, layers: I, schema: &AttributeSchema) -> Result<ResolvedValue>
where
    I: IntoIterator<Item = &'a ConfigLayer>,
{
    let mut consulted = Vec::new();
    for layer in layers {
        consulted.push(layer.name.clone());
        if let Some(value) = layer.lookup(key) {
            debug!(key, layer = %layer.name, "resolved attribute");
            return Ok(ResolvedValue {
                key: key.to_string(),
                value: AttributeValue::Set(value.clone()),
                source_layer: layer.name.clone(),
                consulted,
            });
        }
    }

    if schema.is_required(key) {
        return Err(EngineError::MissingRequiredAttribute {
            key: key.to_string(),
            consulted,
        });
    }
    debug!(key, "attribute unset in every layer");
    Ok(ResolvedValue {
        key: key.to_string(),
        value: AttributeValue::Unset,
        source_layer: UNSET_SOURCE.to_string(),
        consulted,
    })
}

/// Resolve every top-level key any layer defines.
pub fn resolve_all(stack: &LayerStack) -> BTreeMap<String, ResolvedValue> {
    let mut keys: Vec<&String> = stack.iter().flat_map(|layer| layer.values.keys()).collect();
    keys.sort();
    keys.dedup();

    let optional = AttributeSchema { required: &[] };
    keys.into_iter()
        .filter_map(|key| {
            resolve(key, stack, &optional)
                .ok()
                .filter(|resolved| resolved.value.is_set())
                .map(|resolved| (key.clone(), resolved))
        })
        .collect()
}

// ── Venue aliases ───────────────────────────────────────────────────────────

/// A venue reference resolved to a concrete venue id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVenue {
    pub venue_id: String,
    /// The layer whose alias table matched, or `"literal"` for a raw id.
    pub source_layer: String,
}

/// Resolve a venue alias through the `venueAliases` tables of `layers`.
///
/// Alias entries may be a bare id string or an object with a `venueId`.
/// A reference that matches no alias but is purely numeric is taken as a
/// literal venue id. The project table wins over the user table because
/// the project layer precedes it.
///
/// # Errors
///
/// Returns [`EngineError::UnknownVenueAlias`] naming the alias when no
/// table maps it to an id and it is not itself an id.
pub fn resolve_venue<'a, I>(alias_or_id: &str, layers: I) -> Result<ResolvedVenue>
where
    I: IntoIterator<Item = &'a ConfigLayer>,
{
    let mut consulted = Vec::new();
    for layer in layers {
        consulted.push(layer.name.clone());
        let Some(entry) = layer.lookup_path(&["venueAliases", alias_or_id]) else {
            continue;
        };
        let venue_id = match entry {
            Value::Object(object) => object.get("venueId").and_then(id_string),
            other => id_string(other),
        };
        return match venue_id {
            Some(venue_id) => {
                debug!(alias = alias_or_id, layer = %layer.name, %venue_id, "resolved venue alias");
                Ok(ResolvedVenue {
                    venue_id,
                    source_layer: layer.name.clone(),
                })
            }
            None => Err(EngineError::UnknownVenueAlias {
                alias: alias_or_id.to_string(),
                consulted,
            }),
        };
    }

    if !alias_or_id.is_empty() && alias_or_id.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(ResolvedVenue {
            venue_id: alias_or_id.to_string(),
            source_layer: "literal".to_string(),
        });
    }
    Err(EngineError::UnknownVenueAlias {
        alias: alias_or_id.to_string(),
        consulted,
    })
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Built-in defaults ───────────────────────────────────────────────────────

/// The lowest-precedence layer every stack ends with.
pub fn builtin_defaults() -> ConfigLayer {
    let values = json!({
        "duration": 120,
        "publishStatus": "DRAFT",
        "timezone": "UTC",
        "onConflict": "prompt",
        "seriesMode": "independent",
        "defaultTime": "19:00:00",
        "titleTemplate": "Event on {date}",
    });
    let values = match values {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ConfigLayer::of(LayerKind::Builtin, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(kind: LayerKind, value: Value) -> ConfigLayer {
        match value {
            Value::Object(map) => ConfigLayer::of(kind, map),
            _ => panic!("layer values must be an object"),
        }
    }

    fn full_stack() -> LayerStack {
        LayerStack::new(vec![
            builtin_defaults(),
            layer(LayerKind::User, json!({"duration": "1h", "timezone": "Europe/Berlin"})),
            layer(LayerKind::Project, json!({"duration": 90, "venue": "hq"})),
            layer(LayerKind::Cli, json!({"onConflict": "skip"})),
            layer(LayerKind::File, json!({"onConflict": "error", "seriesMode": "link"})),
        ])
    }

    // ── precedence ──────────────────────────────────────────────────────

    #[test]
    fn test_stack_orders_by_priority() {
        let stack = full_stack();
        let names: Vec<&str> = stack.iter().map(ConfigLayer::name).collect();
        assert_eq!(names, vec!["file", "cli", "project", "user", "builtin"]);
    }

    #[test]
    fn test_resolve_picks_highest_layer() {
        let resolved = resolve("onConflict", &full_stack(), &EVENT_SCHEMA).unwrap();
        assert_eq!(resolved.value, AttributeValue::Set(json!("error")));
        assert_eq!(resolved.source_layer, "file");
        assert_eq!(resolved.consulted, vec!["file"]);
    }

    #[test]
    fn test_resolve_falls_through_when_highest_removed() {
        let stack = full_stack();
        let file = stack.get("file").unwrap().clone().without("onConflict");
        let stack = stack.without_layer("file").with_layer(file);

        let resolved = resolve("onConflict", &stack, &EVENT_SCHEMA).unwrap();
        assert_eq!(resolved.value, AttributeValue::Set(json!("skip")));
        assert_eq!(resolved.source_layer, "cli");
        // Other keys are untouched
        let series = resolve("seriesMode", &stack, &EVENT_SCHEMA).unwrap();
        assert_eq!(series.source_layer, "file");
    }

    #[test]
    fn test_resolve_project_over_user_over_builtin() {
        let stack = full_stack();
        assert_eq!(resolve("duration", &stack, &EVENT_SCHEMA).unwrap().source_layer, "project");
        assert_eq!(resolve("timezone", &stack, &EVENT_SCHEMA).unwrap().source_layer, "user");
        assert_eq!(resolve("publishStatus", &stack, &EVENT_SCHEMA).unwrap().source_layer, "builtin");
    }

    #[test]
    fn test_null_falls_through() {
        let stack = LayerStack::new(vec![
            layer(LayerKind::Project, json!({"timezone": null})),
            layer(LayerKind::User, json!({"timezone": "Asia/Tokyo"})),
        ]);
        let resolved = resolve("timezone", &stack, &EVENT_SCHEMA).unwrap();
        assert_eq!(resolved.source_layer, "user");
    }

    // ── absence ─────────────────────────────────────────────────────────

    #[test]
    fn test_missing_required_attribute() {
        let err = resolve("groupUrlname", &full_stack(), &EVENT_SCHEMA).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingRequiredAttribute {
                key: "groupUrlname".to_string(),
                consulted: vec!["file", "cli", "project", "user", "builtin"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            }
        );
        assert!(err.to_string().contains("file > cli > project > user > builtin"));
    }

    #[test]
    fn test_missing_optional_attribute_is_unset() {
        let resolved = resolve("description", &full_stack(), &EVENT_SCHEMA).unwrap();
        assert_eq!(resolved.value, AttributeValue::Unset);
        assert_eq!(resolved.source_layer, UNSET_SOURCE);
    }

    // ── dotted keys and settings ────────────────────────────────────────

    #[test]
    fn test_dotted_lookup() {
        let stack = LayerStack::new(vec![layer(
            LayerKind::Project,
            json!({"groups": {"rust-nyc": {"timezone": "America/New_York"}}}),
        )]);
        let resolved = resolve("groups.rust-nyc.timezone", &stack, &EVENT_SCHEMA).unwrap();
        assert_eq!(resolved.value, AttributeValue::Set(json!("America/New_York")));
    }

    #[test]
    fn test_from_settings_lifts_defaults() {
        let settings = json!({
            "timezone": "UTC",
            "defaults": {"groupUrlname": "rust-nyc", "timezone": "Europe/Paris"},
            "venueAliases": {"hq": "123"},
        });
        let layer = ConfigLayer::from_settings(LayerKind::User, &settings);
        assert_eq!(layer.lookup("groupUrlname"), Some(&json!("rust-nyc")));
        assert_eq!(layer.lookup("timezone"), Some(&json!("UTC")));
        assert!(layer.lookup("defaults").is_none());
        assert_eq!(layer.priority(), 40);
    }

    #[test]
    fn test_resolve_all_reports_provenance() {
        let all = resolve_all(&full_stack());
        assert_eq!(all["duration"].source_layer, "project");
        assert_eq!(all["venue"].value, AttributeValue::Set(json!("hq")));
        assert_eq!(all["titleTemplate"].source_layer, "builtin");
    }

    // ── venue aliases ───────────────────────────────────────────────────

    fn alias_stack() -> LayerStack {
        LayerStack::new(vec![
            layer(
                LayerKind::User,
                json!({"venueAliases": {"hq": {"venueId": "111"}, "pub": "222"}}),
            ),
            layer(
                LayerKind::Project,
                json!({"venueAliases": {"hq": {"venueId": "999", "name": "New HQ"}, "broken": {}}}),
            ),
        ])
    }

    #[test]
    fn test_project_alias_overrides_user_alias() {
        let venue = resolve_venue("hq", &alias_stack()).unwrap();
        assert_eq!(venue.venue_id, "999");
        assert_eq!(venue.source_layer, "project");
    }

    #[test]
    fn test_user_alias_string_entry() {
        let venue = resolve_venue("pub", &alias_stack()).unwrap();
        assert_eq!(venue.venue_id, "222");
        assert_eq!(venue.source_layer, "user");
    }

    #[test]
    fn test_numeric_reference_passes_through() {
        let venue = resolve_venue("4815162342", &alias_stack()).unwrap();
        assert_eq!(venue.venue_id, "4815162342");
        assert_eq!(venue.source_layer, "literal");
    }

    #[test]
    fn test_unknown_alias_names_alias() {
        let err = resolve_venue("garage", &alias_stack()).unwrap_err();
        assert!(matches!(err, EngineError::UnknownVenueAlias { ref alias, .. } if alias == "garage"));
    }

    #[test]
    fn test_alias_without_venue_id_is_unknown() {
        let err = resolve_venue("broken", &alias_stack()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownVenueAlias { ref consulted, .. } if consulted == &vec!["project".to_string()]
        ));
    }
}
