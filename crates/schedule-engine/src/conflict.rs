//! Conflict detection and resolution against already-scheduled events.
//!
//! A candidate event conflicts with an existing one in the same group when
//! they share a start instant or their intervals overlap. Sharing title and
//! interval makes it a [`ConflictKind::Duplicate`], anything else is an
//! [`ConflictKind::Overlap`]. The active [`OnConflict`] policy turns a
//! conflict into a [`ConflictDecision`].
//!
//! The `prompt` policy never blocks. It hands back a [`ConflictPrompt`] that
//! the caller answers with a [`PromptResponse`] after asking a human.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::normalize::NormalizedEvent;

/// Reason attached to decisions made by the `error` policy.
pub const CONFLICT_DETECTED: &str = "conflict detected";

/// Id prefix for events created earlier in the same batch run, followed by
/// the 1-based position of that event in the schedule file.
pub const PLANNED_ID_PREFIX: &str = "planned:";

/// Metadata for an event that already exists on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingEvent {
    pub id: String,
    pub group_urlname: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ExistingEvent {
    /// Half-open interval overlap.
    fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}

/// Existing events keyed by `(group, start instant)`.
///
/// Built once by the caller; conflict resolution only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ExistingEvent>", into = "Vec<ExistingEvent>")]
pub struct ScheduledEventIndex {
    slots: BTreeMap<(String, DateTime<Utc>), ExistingEvent>,
}

impl ScheduledEventIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event, replacing any other event at the same slot.
    pub fn with_event(mut self, event: ExistingEvent) -> Self {
        self.insert(event);
        self
    }

    pub(crate) fn insert(&mut self, event: ExistingEvent) {
        self.slots
            .insert((event.group_urlname.clone(), event.start), event);
    }

    pub(crate) fn remove_id(&mut self, id: &str) {
        self.slots.retain(|_, event| event.id != id);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn at_slot(&self, group: &str, start: DateTime<Utc>) -> Option<&ExistingEvent> {
        self.slots.get(&(group.to_string(), start))
    }

    /// All events in `group`, ordered by start.
    pub fn in_group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a ExistingEvent> + 'a {
        self.slots
            .range((group.to_string(), DateTime::<Utc>::MIN_UTC)..)
            .take_while(move |((g, _), _)| g == group)
            .map(|(_, event)| event)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExistingEvent> {
        self.slots.values()
    }
}

impl FromIterator<ExistingEvent> for ScheduledEventIndex {
    fn from_iter<I: IntoIterator<Item = ExistingEvent>>(iter: I) -> Self {
        let mut index = Self::new();
        for event in iter {
            index.insert(event);
        }
        index
    }
}

impl From<Vec<ExistingEvent>> for ScheduledEventIndex {
    fn from(events: Vec<ExistingEvent>) -> Self {
        events.into_iter().collect()
    }
}

impl From<ScheduledEventIndex> for Vec<ExistingEvent> {
    fn from(index: ScheduledEventIndex) -> Self {
        index.slots.into_values().collect()
    }
}

// ── Classification ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// Same title and same interval.
    Duplicate,
    /// Overlapping interval without an identity match.
    Overlap,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Duplicate => write!(f, "duplicate"),
            ConflictKind::Overlap => write!(f, "overlap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub existing: ExistingEvent,
}

/// Find the existing event `event` collides with, if any.
pub fn detect(event: &NormalizedEvent, index: &ScheduledEventIndex) -> Option<Conflict> {
    let start = event.start.with_timezone(&Utc);
    detect_among(
        event,
        index.at_slot(&event.group_urlname, start),
        index.in_group(&event.group_urlname),
    )
}

/// Classify `event` against an exact-slot match and the rest of its group.
///
/// The exact slot is checked first; otherwise the earliest overlapping
/// candidate wins.
pub fn detect_among<'a, I>(
    event: &NormalizedEvent,
    exact: Option<&'a ExistingEvent>,
    group: I,
) -> Option<Conflict>
where
    I: IntoIterator<Item = &'a ExistingEvent>,
{
    let start = event.start.with_timezone(&Utc);
    let end = event.end.with_timezone(&Utc);

    let existing = exact.or_else(|| {
        group
            .into_iter()
            .filter(|candidate| candidate.group_urlname == event.group_urlname)
            .filter(|candidate| candidate.overlaps(start, end))
            .min_by_key(|candidate| candidate.start)
    })?;

    let kind = if existing.title == event.title && existing.start == start && existing.end == end {
        ConflictKind::Duplicate
    } else {
        ConflictKind::Overlap
    };
    Some(Conflict {
        kind,
        existing: existing.clone(),
    })
}

// ── Decision ────────────────────────────────────────────────────────────────

/// What to do when a candidate collides with an existing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnConflict {
    /// Abort the remaining batch.
    Error,
    /// Leave the existing event alone and skip the candidate.
    Skip,
    /// Update the existing event with the candidate's fields.
    Update,
    /// Ask the caller.
    #[default]
    Prompt,
}

impl std::str::FromStr for OnConflict {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(OnConflict::Error),
            "skip" => Ok(OnConflict::Skip),
            "update" => Ok(OnConflict::Update),
            "prompt" => Ok(OnConflict::Prompt),
            other => Err(EngineError::InvalidAttribute {
                key: "onConflict".to_string(),
                reason: format!("expected error, skip, update or prompt, got '{other}'"),
            }),
        }
    }
}

/// Terminal decision for one candidate event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ConflictDecision {
    /// Nothing collided; create the event.
    NoConflict,
    /// A conflict exists but the event is created anyway.
    Create,
    Skip,
    /// Apply the candidate's fields to an existing event.
    ///
    /// `existing_id` is a platform id from the caller's snapshot, or
    /// `planned:<position>` when the collision is with an event this same
    /// batch planned to create at that position. In the second case there
    /// is nothing on the platform to update yet: fold the candidate into the
    /// earlier create instead. [`ConflictDecision::planned_position`]
    /// tells the two apart.
    #[serde(rename_all = "camelCase")]
    Update { existing_id: String },
    Abort { reason: String },
}

impl ConflictDecision {
    /// Whether the caller should create a new event.
    pub fn creates(&self) -> bool {
        matches!(self, ConflictDecision::NoConflict | ConflictDecision::Create)
    }

    /// Whether processing of the remaining batch stops here.
    pub fn halts(&self) -> bool {
        matches!(self, ConflictDecision::Abort { .. })
    }

    /// For an update of an event planned earlier in the same batch, that
    /// event's position.
    pub fn planned_position(&self) -> Option<usize> {
        match self {
            ConflictDecision::Update { existing_id } => {
                existing_id.strip_prefix(PLANNED_ID_PREFIX)?.parse().ok()
            }
            _ => None,
        }
    }
}

impl fmt::Display for ConflictDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictDecision::NoConflict => write!(f, "create"),
            ConflictDecision::Create => write!(f, "create (despite conflict)"),
            ConflictDecision::Skip => write!(f, "skip"),
            ConflictDecision::Update { existing_id } => write!(f, "update {existing_id}"),
            ConflictDecision::Abort { reason } => write!(f, "abort: {reason}"),
        }
    }
}

/// A caller's answer to a [`ConflictPrompt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    CreateAnyway,
    Skip,
    Update,
    Abort,
}

impl std::str::FromStr for PromptResponse {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "c" | "create" | "create-anyway" => Ok(PromptResponse::CreateAnyway),
            "s" | "skip" => Ok(PromptResponse::Skip),
            "u" | "update" => Ok(PromptResponse::Update),
            "a" | "abort" => Ok(PromptResponse::Abort),
            other => Err(EngineError::InvalidAttribute {
                key: "response".to_string(),
                reason: format!("expected create, skip, update or abort, got '{other}'"),
            }),
        }
    }
}

/// A conflict awaiting a caller decision under the `prompt` policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictPrompt {
    pub event: NormalizedEvent,
    pub conflict: Conflict,
}

impl ConflictPrompt {
    /// Turn the caller's answer into the terminal decision.
    pub fn answer(&self, response: PromptResponse) -> ConflictDecision {
        match response {
            PromptResponse::CreateAnyway => ConflictDecision::Create,
            PromptResponse::Skip => ConflictDecision::Skip,
            PromptResponse::Update => ConflictDecision::Update {
                existing_id: self.conflict.existing.id.clone(),
            },
            PromptResponse::Abort => ConflictDecision::Abort {
                reason: "aborted at conflict prompt".to_string(),
            },
        }
    }
}

/// Result of running a candidate through the resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictOutcome {
    Decided {
        conflict: Option<Conflict>,
        decision: ConflictDecision,
    },
    /// Suspended: answer the prompt to obtain the decision.
    AwaitingDecision(ConflictPrompt),
}

/// Apply `policy` to an already-detected conflict.
pub fn decide(event: &NormalizedEvent, conflict: Option<Conflict>, policy: OnConflict) -> ConflictOutcome {
    let Some(conflict) = conflict else {
        return ConflictOutcome::Decided {
            conflict: None,
            decision: ConflictDecision::NoConflict,
        };
    };

    let decision = match policy {
        OnConflict::Error => ConflictDecision::Abort {
            reason: CONFLICT_DETECTED.to_string(),
        },
        OnConflict::Skip => ConflictDecision::Skip,
        OnConflict::Update => ConflictDecision::Update {
            existing_id: conflict.existing.id.clone(),
        },
        OnConflict::Prompt => {
            return ConflictOutcome::AwaitingDecision(ConflictPrompt {
                event: event.clone(),
                conflict,
            })
        }
    };
    ConflictOutcome::Decided {
        conflict: Some(conflict),
        decision,
    }
}

/// Detect and decide in one call.
pub fn resolve_conflict(
    event: &NormalizedEvent,
    index: &ScheduledEventIndex,
    policy: OnConflict,
) -> ConflictOutcome {
    decide(event, detect(event, index), policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::PublishStatus;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Tz;

    fn instant(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 9, hour, 0, 0).unwrap()
    }

    fn candidate(title: &str, hour: u32, minutes: i64) -> NormalizedEvent {
        let tz: Tz = "America/New_York".parse().unwrap();
        let start = instant(hour).with_timezone(&tz);
        NormalizedEvent {
            title: title.to_string(),
            group_urlname: "rust-nyc".to_string(),
            start,
            end: start + Duration::minutes(minutes),
            duration_minutes: minutes as u32,
            timezone: "America/New_York".to_string(),
            venue_id: None,
            publish_status: PublishStatus::Draft,
            rsvp_settings: None,
            series_tag: None,
            description: None,
            event_hosts: Vec::new(),
            featured_photo_id: None,
            question: None,
            how_to_find_us: None,
            self_rsvp: None,
            is_online: None,
            event_url: None,
        }
    }

    fn existing(id: &str, group: &str, title: &str, hour: u32, minutes: i64) -> ExistingEvent {
        ExistingEvent {
            id: id.to_string(),
            group_urlname: group.to_string(),
            title: title.to_string(),
            start: instant(hour),
            end: instant(hour) + Duration::minutes(minutes),
        }
    }

    fn index() -> ScheduledEventIndex {
        ScheduledEventIndex::new()
            .with_event(existing("e1", "rust-nyc", "Rust Night", 23, 120))
            .with_event(existing("e2", "rust-nyc", "Lunch", 17, 60))
            .with_event(existing("e3", "go-nyc", "Go Night", 20, 120))
    }

    // ── detection ───────────────────────────────────────────────────────

    #[test]
    fn test_no_conflict() {
        assert!(detect(&candidate("Rust Night", 12, 60), &index()).is_none());
    }

    #[test]
    fn test_exact_duplicate() {
        let conflict = detect(&candidate("Rust Night", 23, 120), &index()).unwrap();
        assert_eq!(conflict.kind, ConflictKind::Duplicate);
        assert_eq!(conflict.existing.id, "e1");
    }

    #[test]
    fn test_same_slot_different_title_is_overlap() {
        let conflict = detect(&candidate("Other", 23, 120), &index()).unwrap();
        assert_eq!(conflict.kind, ConflictKind::Overlap);
    }

    #[test]
    fn test_same_slot_different_length_is_overlap() {
        let conflict = detect(&candidate("Rust Night", 23, 60), &index()).unwrap();
        assert_eq!(conflict.kind, ConflictKind::Overlap);
    }

    #[test]
    fn test_interval_overlap_detected() {
        // 16:00-17:30 overlaps the 17:00 lunch
        let conflict = detect(&candidate("Standup", 16, 90), &index()).unwrap();
        assert_eq!(conflict.kind, ConflictKind::Overlap);
        assert_eq!(conflict.existing.id, "e2");
    }

    #[test]
    fn test_touching_intervals_do_not_overlap() {
        // 16:00-17:00 ends exactly when lunch starts
        assert!(detect(&candidate("Standup", 16, 60), &index()).is_none());
    }

    #[test]
    fn test_other_groups_ignored() {
        // go-nyc has an event at 20:00 but the candidate is in rust-nyc
        assert!(detect(&candidate("Go Night", 20, 120), &index()).is_none());
    }

    // ── policies ────────────────────────────────────────────────────────

    #[test]
    fn test_policy_without_conflict_is_no_conflict() {
        for policy in [OnConflict::Error, OnConflict::Skip, OnConflict::Update, OnConflict::Prompt] {
            let outcome = resolve_conflict(&candidate("Fresh", 12, 60), &index(), policy);
            assert_eq!(
                outcome,
                ConflictOutcome::Decided {
                    conflict: None,
                    decision: ConflictDecision::NoConflict
                }
            );
        }
    }

    fn decision_for(policy: OnConflict) -> ConflictDecision {
        match resolve_conflict(&candidate("Rust Night", 23, 120), &index(), policy) {
            ConflictOutcome::Decided { decision, .. } => decision,
            ConflictOutcome::AwaitingDecision(_) => panic!("unexpected prompt"),
        }
    }

    #[test]
    fn test_policy_error_aborts() {
        let decision = decision_for(OnConflict::Error);
        assert_eq!(
            decision,
            ConflictDecision::Abort {
                reason: "conflict detected".to_string()
            }
        );
        assert!(decision.halts());
    }

    #[test]
    fn test_policy_skip_and_update() {
        assert_eq!(decision_for(OnConflict::Skip), ConflictDecision::Skip);
        assert_eq!(
            decision_for(OnConflict::Update),
            ConflictDecision::Update {
                existing_id: "e1".to_string()
            }
        );
    }

    #[test]
    fn test_policy_prompt_suspends_and_resumes() {
        let outcome = resolve_conflict(&candidate("Rust Night", 23, 120), &index(), OnConflict::Prompt);
        let ConflictOutcome::AwaitingDecision(prompt) = outcome else {
            panic!("expected a prompt");
        };
        assert_eq!(prompt.conflict.kind, ConflictKind::Duplicate);
        assert_eq!(prompt.answer(PromptResponse::CreateAnyway), ConflictDecision::Create);
        assert_eq!(prompt.answer(PromptResponse::Skip), ConflictDecision::Skip);
        assert_eq!(
            prompt.answer(PromptResponse::Update),
            ConflictDecision::Update {
                existing_id: "e1".to_string()
            }
        );
        assert!(prompt.answer(PromptResponse::Abort).halts());
    }

    // ── parsing ─────────────────────────────────────────────────────────

    #[test]
    fn test_planned_position_only_for_planned_ids() {
        let planned = ConflictDecision::Update {
            existing_id: "planned:3".to_string(),
        };
        let platform = ConflictDecision::Update {
            existing_id: "e1".to_string(),
        };
        assert_eq!(planned.planned_position(), Some(3));
        assert_eq!(platform.planned_position(), None);
        assert_eq!(ConflictDecision::Create.planned_position(), None);
    }

    #[test]
    fn test_policy_and_response_parsing() {
        assert_eq!("SKIP".parse::<OnConflict>().unwrap(), OnConflict::Skip);
        assert!("ignore".parse::<OnConflict>().is_err());
        assert_eq!("c".parse::<PromptResponse>().unwrap(), PromptResponse::CreateAnyway);
        assert_eq!("Update".parse::<PromptResponse>().unwrap(), PromptResponse::Update);
        assert!("maybe".parse::<PromptResponse>().is_err());
    }

    #[test]
    fn test_index_deserializes_from_list() {
        let index: ScheduledEventIndex = serde_json::from_str(
            r#"[{"id": "9", "groupUrlname": "g", "title": "T",
                 "start": "2025-01-09T23:00:00Z", "end": "2025-01-10T01:00:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.at_slot("g", instant(23)).unwrap().id, "9");
    }
}
