//! # schedule-engine
//!
//! Deterministic core of a batch event scheduler.
//!
//! Turns human-readable recurrence patterns into concrete dates, resolves
//! event attributes through prioritized configuration layers, normalizes
//! raw event descriptions into fully concrete events, and decides what to
//! do when a new event collides with one that already exists. Nothing in
//! this crate performs file or network I/O.
//!
//! ## Modules
//!
//! - [`pattern`]: `"first Thursday after first Tuesday"` → [`RecurrenceRule`]
//! - [`recurrence`]: rule + start + bound → lazy [`DateSequence`]
//! - [`layers`]: prioritized configuration layers and value resolution with provenance
//! - [`normalize`]: raw event + layers → [`NormalizedEvent`]
//! - [`conflict`]: duplicate/overlap detection and the `onConflict` policies
//! - [`batch`]: sequential, resumable processing of a whole schedule file
//! - [`template`]: dates → editable schedule document
//! - [`validate`]: structural checks for schedule and settings documents
//! - [`error`]: Error types

pub mod batch;
pub mod conflict;
pub mod error;
pub mod layers;
pub mod normalize;
pub mod pattern;
pub mod recurrence;
pub mod template;
pub mod validate;

pub use batch::{
    run_to_completion, BatchHalt, BatchReport, BatchStep, EventFailure, PlannedEvent,
    ScheduleDocument, ScheduleRun,
};
pub use conflict::{
    decide, detect, resolve_conflict, Conflict, ConflictDecision, ConflictKind, ConflictOutcome,
    ConflictPrompt, ExistingEvent, OnConflict, PromptResponse, ScheduledEventIndex,
};
pub use error::{EngineError, Result};
pub use layers::{
    builtin_defaults, resolve, resolve_all, resolve_venue, AttributeValue, ConfigLayer, LayerKind,
    LayerStack, ResolvedValue, EVENT_SCHEMA,
};
pub use normalize::{normalize, NormalizedEvent, PublishStatus, RawEventSpec, SeriesMode};
pub use pattern::{parse, Ordinal, RecurrenceRule, Relation};
pub use recurrence::{generate, next_occurrence, Bound, DateSequence};
pub use template::{build_template, ScheduleTemplate};
pub use validate::{validate_schedule, validate_settings, ValidationIssue};
