//! Property tests for recurrence, duration parsing and layer precedence,
//! plus a cross-check of simple rules against RFC 5545 expansion.

use chrono::{Datelike, NaiveDate, Weekday};
use proptest::prelude::*;
use rrule::RRuleSet;
use serde_json::{json, Map};

use schedule_engine::layers::{resolve, ConfigLayer, LayerKind, LayerStack, EVENT_SCHEMA};
use schedule_engine::normalize::{format_duration, parse_duration_str};
use schedule_engine::pattern::{AnchorClause, Ordinal, RecurrenceRule, Relation};
use schedule_engine::recurrence::{generate, next_occurrence, Bound};

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

// ── Strategies ──────────────────────────────────────────────────────────────

fn weekday() -> impl Strategy<Value = Weekday> {
    (0usize..7).prop_map(|i| WEEKDAYS[i])
}

fn ordinal() -> impl Strategy<Value = Ordinal> {
    prop_oneof![(1u8..=5).prop_map(Ordinal::Nth), Just(Ordinal::Last)]
}

/// Ordinals that occur in every month.
fn reliable_ordinal() -> impl Strategy<Value = Ordinal> {
    prop_oneof![(1u8..=4).prop_map(Ordinal::Nth), Just(Ordinal::Last)]
}

fn relation() -> impl Strategy<Value = Relation> {
    prop_oneof![Just(Relation::After), Just(Relation::Before)]
}

fn rule() -> impl Strategy<Value = RecurrenceRule> {
    (
        ordinal(),
        weekday(),
        proptest::option::of((ordinal(), weekday(), relation())),
    )
        .prop_map(|(ordinal, weekday, anchor)| RecurrenceRule {
            ordinal,
            weekday,
            anchor: anchor.map(|(ordinal, weekday, relation)| AnchorClause {
                ordinal,
                weekday,
                relation,
            }),
        })
}

fn simple_rule() -> impl Strategy<Value = RecurrenceRule> {
    (reliable_ordinal(), weekday()).prop_map(|(o, w)| RecurrenceRule::simple(o, w))
}

fn start_date() -> impl Strategy<Value = NaiveDate> {
    (1990i32..2090, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

// ── Recurrence ──────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_dates_strictly_increasing_and_not_before_start(
        rule in rule(),
        start in start_date(),
        count in 0usize..30,
    ) {
        let dates: Vec<_> = generate(&rule, start, Bound::Count(count)).collect();
        prop_assert!(dates.len() <= count);
        prop_assert!(dates.iter().all(|d| *d >= start));
        prop_assert!(dates.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(dates.iter().all(|d| d.weekday() == rule.weekday));
    }

    #[test]
    fn prop_count_honoured_for_reliable_rules(
        rule in simple_rule(),
        start in start_date(),
        count in 0usize..50,
    ) {
        let dates: Vec<_> = generate(&rule, start, Bound::Count(count)).collect();
        prop_assert_eq!(dates.len(), count);
    }

    #[test]
    fn prop_until_bound_is_exclusive(
        rule in rule(),
        start in start_date(),
        days in 0i64..1500,
    ) {
        let end = start + chrono::Duration::days(days);
        let dates: Vec<_> = generate(&rule, start, Bound::Until(end)).collect();
        prop_assert!(dates.iter().all(|d| *d >= start && *d < end));
    }

    #[test]
    fn prop_generation_is_deterministic(
        rule in rule(),
        start in start_date(),
        count in 0usize..20,
    ) {
        let sequence = generate(&rule, start, Bound::Count(count));
        let first: Vec<_> = sequence.clone().collect();
        let second: Vec<_> = generate(&rule, start, Bound::Count(count)).collect();
        let restarted: Vec<_> = sequence.restart().collect();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&first, &restarted);
    }

    #[test]
    fn prop_next_occurrence_matches_generation(
        rule in simple_rule(),
        after in start_date(),
    ) {
        let next = next_occurrence(&rule, after);
        let day_after = after.succ_opt().unwrap();
        let generated = generate(&rule, day_after, Bound::Count(1)).next();
        prop_assert_eq!(next, generated);
        prop_assert!(next.is_some_and(|d| d > after));
    }
}

// ── RFC 5545 cross-check ────────────────────────────────────────────────────

/// Expand `rule` with the rrule crate, keeping dates strictly after `start`.
fn rfc_dates(rule: &RecurrenceRule, start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let body = rule.to_rrule().unwrap();
    let text = format!("DTSTART:{}T000000Z\nRRULE:{body}", start.format("%Y%m%d"));
    let set: RRuleSet = text.parse().unwrap();
    set.all(n as u16 + 2)
        .dates
        .iter()
        .map(|dt| dt.date_naive())
        .filter(|d| *d > start)
        .take(n)
        .collect()
}

fn engine_dates(rule: &RecurrenceRule, start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    generate(rule, start, Bound::Count(n + 1))
        .filter(|d| *d > start)
        .take(n)
        .collect()
}

#[test]
fn test_simple_rules_agree_with_rrule() {
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    for ordinal in [
        Ordinal::Nth(1),
        Ordinal::Nth(2),
        Ordinal::Nth(3),
        Ordinal::Nth(4),
        Ordinal::Last,
    ] {
        for weekday in WEEKDAYS {
            let rule = RecurrenceRule::simple(ordinal, weekday);
            assert_eq!(
                engine_dates(&rule, start, 24),
                rfc_dates(&rule, start, 24),
                "rule {rule}"
            );
        }
    }
}

#[test]
fn test_fifth_weekday_agrees_with_rrule() {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let rule = RecurrenceRule::simple(Ordinal::Nth(5), Weekday::Mon);
    assert_eq!(engine_dates(&rule, start, 8), rfc_dates(&rule, start, 8));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_reliable_rules_agree_with_rrule(rule in simple_rule(), start in start_date()) {
        prop_assert_eq!(engine_dates(&rule, start, 6), rfc_dates(&rule, start, 6));
    }
}

// ── Duration ────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_duration_format_parses_back(minutes in 1u32..100_000) {
        prop_assert_eq!(parse_duration_str(&format_duration(minutes)).unwrap(), minutes);
    }

    #[test]
    fn prop_duration_hours_and_minutes(h in 0u32..200, m in 0u32..600) {
        prop_assume!(h + m > 0);
        let text = match (h, m) {
            (0, m) => format!("{m}m"),
            (h, 0) => format!("{h}h"),
            (h, m) => format!("{h}h{m}m"),
        };
        prop_assert_eq!(parse_duration_str(&text).unwrap(), h * 60 + m);
    }
}

// ── Layer precedence ────────────────────────────────────────────────────────

const KINDS: [LayerKind; 5] = [
    LayerKind::File,
    LayerKind::Cli,
    LayerKind::Project,
    LayerKind::User,
    LayerKind::Builtin,
];

proptest! {
    #[test]
    fn prop_first_defining_layer_wins(defines in proptest::collection::vec(any::<bool>(), 5)) {
        // Build the layers in reverse so the stack must sort them.
        let layers: Vec<ConfigLayer> = KINDS
            .iter()
            .zip(&defines)
            .rev()
            .map(|(kind, defined)| {
                let mut values = Map::new();
                if *defined {
                    values.insert("venue".to_string(), json!(kind.name()));
                }
                ConfigLayer::of(*kind, values)
            })
            .collect();
        let stack = LayerStack::new(layers);
        let resolved = resolve("venue", &stack, &EVENT_SCHEMA).unwrap();

        match defines.iter().position(|d| *d) {
            Some(winner) => {
                let name = KINDS[winner].name();
                prop_assert_eq!(resolved.source_layer.as_str(), name);
                prop_assert_eq!(resolved.value.as_value(), Some(&json!(name)));
                prop_assert_eq!(resolved.consulted.len(), winner + 1);
            }
            None => {
                prop_assert!(!resolved.value.is_set());
                prop_assert_eq!(resolved.consulted.len(), KINDS.len());
            }
        }
    }

    #[test]
    fn prop_removing_winner_falls_through(defines in proptest::collection::vec(any::<bool>(), 5)) {
        let layers: Vec<ConfigLayer> = KINDS
            .iter()
            .zip(&defines)
            .map(|(kind, defined)| {
                let mut values = Map::new();
                if *defined {
                    values.insert("duration".to_string(), json!(kind.priority()));
                }
                ConfigLayer::of(*kind, values)
            })
            .collect();
        let stack = LayerStack::new(layers);
        let first = resolve("duration", &stack, &EVENT_SCHEMA).unwrap();
        prop_assume!(first.value.is_set());

        let reduced = stack.without_layer(&first.source_layer);
        let second = resolve("duration", &reduced, &EVENT_SCHEMA).unwrap();
        let expected = defines
            .iter()
            .enumerate()
            .filter(|(_, d)| **d)
            .nth(1)
            .map(|(i, _)| KINDS[i].name());
        match expected {
            Some(name) => prop_assert_eq!(second.source_layer.as_str(), name),
            None => prop_assert!(!second.value.is_set()),
        }
    }
}
