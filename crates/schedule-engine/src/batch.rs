//! Sequential processing of a schedule file.
//!
//! Events are normalized and conflict-checked strictly in file order. The
//! run keeps a private view of the schedule that layers this run's own
//! decisions over the caller's snapshot: an event planned for creation can
//! collide with a later event in the same file, and an `update` moves the
//! existing event to the candidate's slot for every later check. The
//! caller's [`ScheduledEventIndex`] is never modified.
//!
//! [`ScheduleRun::step`] yields one [`BatchStep`] per event. Under the
//! `prompt` policy a step may be [`BatchStep::NeedsDecision`], after which
//! the run stays suspended until [`ScheduleRun::answer`] is called.
//! Dropping a run at any point leaves nothing to clean up.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::conflict::{
    decide, detect_among, Conflict, ConflictDecision, ConflictOutcome, ConflictPrompt,
    ExistingEvent, OnConflict, PromptResponse, ScheduledEventIndex, PLANNED_ID_PREFIX,
};
use crate::error::{EngineError, Result};
use crate::layers::{resolve, AttributeValue, ConfigLayer, LayerKind, LayerStack, EVENT_SCHEMA};
use crate::normalize::{normalize, NormalizedEvent, RawEventSpec};

/// A schedule file as read from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDocument {
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub events: Vec<RawEventSpec>,
}

impl ScheduleDocument {
    /// The `file` layer: `defaults` merged under `options`.
    pub fn file_layer(&self) -> ConfigLayer {
        let mut values = self.defaults.clone();
        for (key, value) in &self.options {
            values.insert(key.clone(), value.clone());
        }
        ConfigLayer::of(LayerKind::File, values)
    }
}

/// An event that received a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedEvent {
    /// 1-based position in the schedule file.
    pub position: usize,
    pub event: NormalizedEvent,
    pub conflict: Option<Conflict>,
    pub decision: ConflictDecision,
}

/// An event that could not be normalized.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("event {position} ({}): {error}", .title.as_deref().unwrap_or("untitled"))]
pub struct EventFailure {
    pub position: usize,
    pub title: Option<String>,
    #[source]
    pub error: EngineError,
}

/// Why and where a batch stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchHalt {
    /// 1-based position of the event that stopped the batch.
    pub position: usize,
    /// How many earlier events already received a decision.
    pub decided_before: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchStep {
    Planned(PlannedEvent),
    Failed(EventFailure),
    /// Suspended on a conflict; call [`ScheduleRun::answer`] to continue.
    NeedsDecision {
        position: usize,
        prompt: ConflictPrompt,
    },
}

/// The run's view of the schedule: caller snapshot plus this run's effects.
#[derive(Debug)]
struct ScheduleView<'a> {
    snapshot: &'a ScheduledEventIndex,
    overlay: ScheduledEventIndex,
    replaced: HashSet<String>,
}

impl<'a> ScheduleView<'a> {
    fn new(snapshot: &'a ScheduledEventIndex) -> Self {
        Self {
            snapshot,
            overlay: ScheduledEventIndex::new(),
            replaced: HashSet::new(),
        }
    }

    fn visible(&self, event: &ExistingEvent) -> bool {
        !self.replaced.contains(&event.id)
    }

    fn detect(&self, event: &NormalizedEvent) -> Option<Conflict> {
        let group = event.group_urlname.as_str();
        let start = event.start.with_timezone(&Utc);
        let exact = self
            .overlay
            .at_slot(group, start)
            .or_else(|| self.snapshot.at_slot(group, start).filter(|e| self.visible(e)));
        let candidates = self
            .overlay
            .in_group(group)
            .chain(self.snapshot.in_group(group).filter(|e| self.visible(e)));
        detect_among(event, exact, candidates)
    }

    fn apply(&mut self, position: usize, event: &NormalizedEvent, decision: &ConflictDecision) {
        let id = match decision {
            ConflictDecision::NoConflict | ConflictDecision::Create => {
                format!("{PLANNED_ID_PREFIX}{position}")
            }
            ConflictDecision::Update { existing_id } => {
                self.overlay.remove_id(existing_id);
                self.replaced.insert(existing_id.clone());
                existing_id.clone()
            }
            ConflictDecision::Skip | ConflictDecision::Abort { .. } => return,
        };
        self.overlay.insert(ExistingEvent {
            id,
            group_urlname: event.group_urlname.clone(),
            title: event.title.clone(),
            start: event.start.with_timezone(&Utc),
            end: event.end.with_timezone(&Utc),
        });
    }
}

#[derive(Debug, Clone)]
struct PendingDecision {
    position: usize,
    prompt: ConflictPrompt,
}

/// A resumable, strictly sequential pass over one schedule file.
#[derive(Debug)]
pub struct ScheduleRun<'a> {
    events: Vec<RawEventSpec>,
    stack: LayerStack,
    policy: OnConflict,
    view: ScheduleView<'a>,
    cursor: usize,
    decided: usize,
    pending: Option<PendingDecision>,
    halt: Option<BatchHalt>,
}

impl<'a> ScheduleRun<'a> {
    /// Prepare a run. The `onConflict` policy is resolved from `stack`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidAttribute`] when `onConflict` resolves
    /// to something other than a known policy.
    pub fn new(
        events: Vec<RawEventSpec>,
        stack: LayerStack,
        snapshot: &'a ScheduledEventIndex,
    ) -> Result<Self> {
        let policy = match resolve("onConflict", &stack, &EVENT_SCHEMA)?.value {
            AttributeValue::Set(Value::String(s)) => s.parse()?,
            AttributeValue::Set(other) => {
                return Err(EngineError::InvalidAttribute {
                    key: "onConflict".to_string(),
                    reason: format!("expected a string, got {other}"),
                })
            }
            AttributeValue::Unset => OnConflict::default(),
        };
        Ok(Self {
            events,
            stack,
            policy,
            view: ScheduleView::new(snapshot),
            cursor: 0,
            decided: 0,
            pending: None,
            halt: None,
        })
    }

    /// Build a run for a parsed schedule document over `defaults`.
    pub fn for_document(
        document: &ScheduleDocument,
        defaults: &LayerStack,
        snapshot: &'a ScheduledEventIndex,
    ) -> Result<Self> {
        let stack = defaults.with_layer(document.file_layer());
        Self::new(document.events.clone(), stack, snapshot)
    }

    pub fn policy(&self) -> OnConflict {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events that have received a decision so far.
    pub fn decided(&self) -> usize {
        self.decided
    }

    pub fn halt(&self) -> Option<&BatchHalt> {
        self.halt.as_ref()
    }

    /// Advance to the next event.
    ///
    /// Returns `None` once every event has been processed or the batch has
    /// halted. While a decision is pending the same prompt is returned again.
    pub fn step(&mut self) -> Option<BatchStep> {
        if self.halt.is_some() {
            return None;
        }
        if let Some(pending) = &self.pending {
            return Some(BatchStep::NeedsDecision {
                position: pending.position,
                prompt: pending.prompt.clone(),
            });
        }

        let raw = self.events.get(self.cursor)?;
        self.cursor += 1;
        let position = self.cursor;

        let event = match normalize(raw, &self.stack) {
            Ok(event) => event,
            Err(error) => {
                let failure = EventFailure {
                    position,
                    title: raw.title().map(str::to_string),
                    error,
                };
                warn!(%failure, "event rejected");
                if self.policy == OnConflict::Error {
                    self.stop(position, failure.to_string());
                }
                return Some(BatchStep::Failed(failure));
            }
        };

        match decide(&event, self.view.detect(&event), self.policy) {
            ConflictOutcome::Decided { conflict, decision } => {
                Some(BatchStep::Planned(self.record(position, event, conflict, decision)))
            }
            ConflictOutcome::AwaitingDecision(prompt) => {
                info!(position, title = %prompt.event.title, kind = %prompt.conflict.kind, "awaiting conflict decision");
                self.pending = Some(PendingDecision {
                    position,
                    prompt: prompt.clone(),
                });
                Some(BatchStep::NeedsDecision { position, prompt })
            }
        }
    }

    /// Resume a suspended run with the caller's answer.
    ///
    /// Returns `None` when no decision is pending.
    pub fn answer(&mut self, response: PromptResponse) -> Option<PlannedEvent> {
        let PendingDecision { position, prompt } = self.pending.take()?;
        let decision = prompt.answer(response);
        Some(self.record(position, prompt.event, Some(prompt.conflict), decision))
    }

    fn record(
        &mut self,
        position: usize,
        event: NormalizedEvent,
        conflict: Option<Conflict>,
        decision: ConflictDecision,
    ) -> PlannedEvent {
        info!(position, title = %event.title, %decision, "decided");
        match &decision {
            ConflictDecision::Abort { reason } => self.stop(position, reason.clone()),
            other => {
                self.view.apply(position, &event, other);
                self.decided += 1;
            }
        }
        PlannedEvent {
            position,
            event,
            conflict,
            decision,
        }
    }

    fn stop(&mut self, position: usize, reason: String) {
        warn!(position, decided_before = self.decided, %reason, "batch halted");
        self.halt = Some(BatchHalt {
            position,
            decided_before: self.decided,
            reason,
        });
    }
}

/// Everything a completed (or halted) run produced, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub planned: Vec<PlannedEvent>,
    pub failures: Vec<EventFailure>,
    pub halt: Option<BatchHalt>,
}

impl BatchReport {
    /// Planned events the caller should create.
    pub fn to_create(&self) -> impl Iterator<Item = &PlannedEvent> {
        self.planned.iter().filter(|planned| planned.decision.creates())
    }
}

/// Drive `run` to completion, answering prompts with `decide`.
pub fn run_to_completion<F>(mut run: ScheduleRun<'_>, mut decide: F) -> BatchReport
where
    F: FnMut(usize, &ConflictPrompt) -> PromptResponse,
{
    let mut report = BatchReport::default();
    while let Some(step) = run.step() {
        match step {
            BatchStep::Planned(planned) => report.planned.push(planned),
            BatchStep::Failed(failure) => report.failures.push(failure),
            BatchStep::NeedsDecision { position, prompt } => {
                let response = decide(position, &prompt);
                if let Some(planned) = run.answer(response) {
                    report.planned.push(planned);
                }
            }
        }
    }
    report.halt = run.halt().cloned();
    report
}
