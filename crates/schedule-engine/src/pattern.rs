//! Recurrence pattern parsing.
//!
//! Turns human-readable patterns such as `"first Thursday"` or
//! `"first Thursday after first Tuesday"` into a [`RecurrenceRule`].
//! Parsing never consults a calendar: whether a fifth Monday exists in a
//! given month is decided later by the generator.
//!
//! # Grammar
//!
//! ```text
//! pattern  := ordinal weekday ( ("after" | "before") ordinal weekday )?
//! ordinal  := first | second | third | fourth | fifth | last | 1st .. 5th
//! weekday  := monday .. sunday | mon .. sun
//! ```
//!
//! Matching is case-insensitive and tolerates surrounding and repeated
//! whitespace.

use std::fmt;

use chrono::Weekday;

use crate::error::{EngineError, Result};

/// Which occurrence of a weekday within a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ordinal {
    /// The n-th occurrence counting forward from day 1 (1..=5).
    Nth(u8),
    /// The final occurrence counting backward from month end.
    Last,
}

impl Ordinal {
    fn as_word(self) -> &'static str {
        match self {
            Ordinal::Nth(1) => "first",
            Ordinal::Nth(2) => "second",
            Ordinal::Nth(3) => "third",
            Ordinal::Nth(4) => "fourth",
            Ordinal::Nth(_) => "fifth",
            Ordinal::Last => "last",
        }
    }
}

/// Whether the subject weekday is positioned after or before its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    After,
    Before,
}

/// The secondary ordinal-weekday reference in `"X after Y"` patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnchorClause {
    pub ordinal: Ordinal,
    pub weekday: Weekday,
    pub relation: Relation,
}

/// A parsed recurrence pattern. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecurrenceRule {
    pub ordinal: Ordinal,
    pub weekday: Weekday,
    pub anchor: Option<AnchorClause>,
}

impl RecurrenceRule {
    /// A plain ordinal-weekday rule with no anchor clause.
    pub fn simple(ordinal: Ordinal, weekday: Weekday) -> Self {
        Self {
            ordinal,
            weekday,
            anchor: None,
        }
    }

    /// Render a non-anchored rule as an RFC 5545 RRULE body.
    ///
    /// Anchored rules can spill into the following month, which no
    /// `FREQ=MONTHLY` rule expresses, so they return `None`.
    ///
    /// ```
    /// use schedule_engine::pattern::parse;
    ///
    /// let rule = parse("last Friday").unwrap();
    /// assert_eq!(rule.to_rrule().as_deref(), Some("FREQ=MONTHLY;BYDAY=-1FR"));
    /// ```
    pub fn to_rrule(&self) -> Option<String> {
        if self.anchor.is_some() {
            return None;
        }
        let position = match self.ordinal {
            Ordinal::Nth(n) => n.to_string(),
            Ordinal::Last => "-1".to_string(),
        };
        Some(format!(
            "FREQ=MONTHLY;BYDAY={position}{}",
            rrule_weekday(self.weekday)
        ))
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.ordinal.as_word(),
            weekday_name(self.weekday)
        )?;
        if let Some(anchor) = &self.anchor {
            let relation = match anchor.relation {
                Relation::After => "after",
                Relation::Before => "before",
            };
            write!(
                f,
                " {relation} {} {}",
                anchor.ordinal.as_word(),
                weekday_name(anchor.weekday)
            )?;
        }
        Ok(())
    }
}

impl std::str::FromStr for RecurrenceRule {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        parse(s)
    }
}

/// Parse a recurrence pattern string.
///
/// # Errors
///
/// Returns [`EngineError::PatternSyntax`] when the text does not match the
/// grammar in the module docs.
///
/// # Examples
///
/// ```
/// use chrono::Weekday;
/// use schedule_engine::pattern::{parse, Ordinal, Relation};
///
/// let rule = parse("First Thursday after first Tuesday").unwrap();
/// assert_eq!(rule.ordinal, Ordinal::Nth(1));
/// assert_eq!(rule.weekday, Weekday::Thu);
/// let anchor = rule.anchor.unwrap();
/// assert_eq!(anchor.weekday, Weekday::Tue);
/// assert_eq!(anchor.relation, Relation::After);
/// ```
pub fn parse(text: &str) -> Result<RecurrenceRule> {
    let lowered = text.trim().to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();

    let syntax_error = || EngineError::PatternSyntax(format!("'{}'", text.trim()));

    match tokens.as_slice() {
        [ordinal, weekday] => Ok(RecurrenceRule::simple(
            parse_ordinal(ordinal).ok_or_else(syntax_error)?,
            parse_weekday(weekday).ok_or_else(syntax_error)?,
        )),
        [ordinal, weekday, relation, anchor_ordinal, anchor_weekday] => {
            let relation = match *relation {
                "after" => Relation::After,
                "before" => Relation::Before,
                _ => return Err(syntax_error()),
            };
            Ok(RecurrenceRule {
                ordinal: parse_ordinal(ordinal).ok_or_else(syntax_error)?,
                weekday: parse_weekday(weekday).ok_or_else(syntax_error)?,
                anchor: Some(AnchorClause {
                    ordinal: parse_ordinal(anchor_ordinal).ok_or_else(syntax_error)?,
                    weekday: parse_weekday(anchor_weekday).ok_or_else(syntax_error)?,
                    relation,
                }),
            })
        }
        _ => Err(syntax_error()),
    }
}

// ── Vocabulary ──────────────────────────────────────────────────────────────

fn parse_ordinal(s: &str) -> Option<Ordinal> {
    match s {
        "first" | "1st" => Some(Ordinal::Nth(1)),
        "second" | "2nd" => Some(Ordinal::Nth(2)),
        "third" | "3rd" => Some(Ordinal::Nth(3)),
        "fourth" | "4th" => Some(Ordinal::Nth(4)),
        "fifth" | "5th" => Some(Ordinal::Nth(5)),
        "last" => Some(Ordinal::Last),
        _ => None,
    }
}

/// Parse a lowercase weekday name, full or three-letter.
pub(crate) fn parse_weekday(s: &str) -> Option<Weekday> {
    match s {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

pub(crate) fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn rrule_weekday(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}
