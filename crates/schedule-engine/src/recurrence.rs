//! Recurrence expansion: [`RecurrenceRule`] + start date + bound → dates.
//!
//! Expansion walks the calendar month by month starting from the month that
//! contains `start`. Each month contributes at most one date. Months where
//! the requested ordinal does not exist (a fifth Monday in a four-Monday
//! month) are skipped silently rather than reported as errors.
//!
//! Anchored rules resolve the anchor inside the month first and then step
//! from it, so `"first Monday after last Saturday"` for May 2025 lands on
//! June 2. That spill into the neighbouring month is intended.
//!
//! The returned [`DateSequence`] is lazy and restartable: it holds only the
//! rule, the bound, and a month cursor, so re-running it with the same
//! arguments always yields the same dates.

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::pattern::{Ordinal, RecurrenceRule, Relation};

/// Generation stops this many years past `start` even if the bound is not met.
const HORIZON_YEARS: i32 = 100;

/// When a [`DateSequence`] stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Emit at most this many dates.
    Count(usize),
    /// Emit dates strictly before this date.
    Until(NaiveDate),
}

impl Bound {
    /// Build a bound from the two mutually exclusive CLI-style options.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidBound`] unless exactly one is given.
    pub fn from_options(count: Option<usize>, until: Option<NaiveDate>) -> Result<Self> {
        match (count, until) {
            (Some(n), None) => Ok(Bound::Count(n)),
            (None, Some(end)) => Ok(Bound::Until(end)),
            (Some(_), Some(_)) => Err(EngineError::InvalidBound(
                "specify either a count or an end date, not both".to_string(),
            )),
            (None, None) => Err(EngineError::InvalidBound(
                "specify either a count or an end date".to_string(),
            )),
        }
    }
}

/// A lazy, finite sequence of dates for one rule.
#[derive(Debug, Clone)]
pub struct DateSequence {
    rule: RecurrenceRule,
    start: NaiveDate,
    bound: Bound,
    first_month: NaiveDate,
    cursor: Option<NaiveDate>,
    emitted: usize,
    last: Option<NaiveDate>,
}

impl DateSequence {
    fn new(rule: RecurrenceRule, start: NaiveDate, bound: Bound, first_month: NaiveDate) -> Self {
        Self {
            rule,
            start,
            bound,
            first_month,
            cursor: Some(first_month),
            emitted: 0,
            last: None,
        }
    }

    /// A fresh copy of this sequence, rewound to its first date.
    pub fn restart(&self) -> Self {
        Self::new(self.rule, self.start, self.bound, self.first_month)
    }

    pub fn rule(&self) -> &RecurrenceRule {
        &self.rule
    }

    fn horizon_passed(&self, month: NaiveDate) -> bool {
        month.year() > self.start.year() + HORIZON_YEARS
    }
}

impl Iterator for DateSequence {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if let Bound::Count(n) = self.bound {
            if self.emitted >= n {
                self.cursor = None;
                return None;
            }
        }

        loop {
            let month = self.cursor?;
            if self.horizon_passed(month) {
                self.cursor = None;
                return None;
            }
            self.cursor = month.checked_add_months(Months::new(1));

            let Some(date) = occurrence_in_month(&self.rule, month.year(), month.month()) else {
                debug!(rule = %self.rule, month = %month.format("%Y-%m"), "no occurrence, skipping month");
                continue;
            };
            if date < self.start || self.last.is_some_and(|last| date <= last) {
                continue;
            }
            if let Bound::Until(end) = self.bound {
                if date >= end {
                    self.cursor = None;
                    return None;
                }
            }

            self.emitted += 1;
            self.last = Some(date);
            return Some(date);
        }
    }
}

/// Expand `rule` from the month containing `start` until `bound` is met.
///
/// Only months from `start`'s month onward contribute dates. A date that an
/// anchored rule carries over from the previous month's anchor is never
/// produced, even when it falls on or after `start`; [`next_occurrence`]
/// does look one month back. For `"first Monday after last Saturday"`,
/// `generate` from 2025-06-01 with `Bound::Count(1)` yields 2025-06-30 (from
/// June's anchor), while `next_occurrence` after 2025-05-31 is 2025-06-02
/// (from May's anchor).
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use schedule_engine::pattern::parse;
/// use schedule_engine::recurrence::{generate, Bound};
///
/// let rule = parse("first Thursday").unwrap();
/// let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
/// let dates: Vec<_> = generate(&rule, start, Bound::Count(3)).collect();
/// assert_eq!(dates[0].to_string(), "2025-01-02");
/// assert_eq!(dates[2].to_string(), "2025-03-06");
/// ```
pub fn generate(rule: &RecurrenceRule, start: NaiveDate, bound: Bound) -> DateSequence {
    DateSequence::new(*rule, start, bound, first_of_month(start))
}

/// The first occurrence of `rule` strictly after `after`.
///
/// Scanning begins one month early so that an anchored rule whose previous
/// month spills past `after` is still found.
pub fn next_occurrence(rule: &RecurrenceRule, after: NaiveDate) -> Option<NaiveDate> {
    let start = after.succ_opt()?;
    let first_month = first_of_month(after).checked_sub_months(Months::new(1))?;
    DateSequence::new(*rule, start, Bound::Count(1), first_month).next()
}

/// The single date `rule` selects for a month, if any.
pub fn occurrence_in_month(rule: &RecurrenceRule, year: i32, month: u32) -> Option<NaiveDate> {
    let Some(anchor) = rule.anchor else {
        return find_nth_weekday_in_month(year, month, rule.weekday, rule.ordinal);
    };

    let anchor_date = find_nth_weekday_in_month(year, month, anchor.weekday, anchor.ordinal)?;
    match anchor.relation {
        Relation::After => {
            let first = anchor_date + Duration::days(days_forward(anchor.weekday, rule.weekday));
            match rule.ordinal {
                Ordinal::Nth(n) => Some(first + Duration::weeks(i64::from(n) - 1)),
                Ordinal::Last => last_in_direction(first, month, 7),
            }
        }
        Relation::Before => {
            let nearest = anchor_date - Duration::days(days_forward(rule.weekday, anchor.weekday));
            match rule.ordinal {
                Ordinal::Nth(n) => Some(nearest - Duration::weeks(i64::from(n) - 1)),
                Ordinal::Last => last_in_direction(nearest, month, -7),
            }
        }
    }
}

/// Find the Nth (or last) weekday in a month.
pub(crate) fn find_nth_weekday_in_month(
    year: i32,
    month: u32,
    weekday: Weekday,
    ordinal: Ordinal,
) -> Option<NaiveDate> {
    let target = match ordinal {
        Ordinal::Nth(n) => {
            let first = NaiveDate::from_ymd_opt(year, month, 1)?;
            let diff = days_between(first.weekday(), weekday);
            first + Duration::days(diff) + Duration::weeks(i64::from(n) - 1)
        }
        Ordinal::Last => {
            let last = NaiveDate::from_ymd_opt(year, month, 1)?
                .checked_add_months(Months::new(1))?
                .pred_opt()?;
            let diff = days_between(weekday, last.weekday());
            last - Duration::days(diff)
        }
    };
    (target.month() == month).then_some(target)
}

/// Days to walk forward from `from` to reach `to`, in `0..7`.
fn days_between(from: Weekday, to: Weekday) -> i64 {
    (i64::from(to.num_days_from_monday()) - i64::from(from.num_days_from_monday()) + 7) % 7
}

/// Days from `from` to the next `to` strictly later, in `1..=7`.
fn days_forward(from: Weekday, to: Weekday) -> i64 {
    match days_between(from, to) {
        0 => 7,
        d => d,
    }
}

/// Step from `date` by `step` days while staying inside `month`.
///
/// `None` when `date` itself already left the month.
fn last_in_direction(date: NaiveDate, month: u32, step: i64) -> Option<NaiveDate> {
    if date.month() != month {
        return None;
    }
    let mut current = date;
    loop {
        let next = current + Duration::days(step);
        if next.month() != month {
            return Some(current);
        }
        current = next;
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}
