//! Filter configuration and the predicate set evaluated per record.
//!
//! # Responsibility
//! - Hold every active predicate parameter as one `FilterConfig` snapshot.
//! - Decide record visibility as the AND of independent, total predicates.
//!
//! # Invariants
//! - An inactive predicate returns `true`; an all-inactive config is the
//!   identity filter.
//! - A missing range bound is unbounded on that side.
//! - `DateRange::Custom` always filters by its bounds; it never degrades to
//!   "all time".
//! - Category values are compared in normalized (trimmed, lowercase) form.

use crate::clock::DAY_MS;
use crate::model::entity::Queryable;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Inclusive numeric range; `None` bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    pub fn is_active(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Date window over a record's designated date (epoch ms).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DateRange {
    #[default]
    AllTime,
    /// From `now - days` onward.
    LastDays { days: u32 },
    /// Inclusive bounds; a missing bound is open on that side.
    Custom { from: Option<i64>, to: Option<i64> },
}

impl DateRange {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::AllTime)
    }

    pub fn contains(&self, value: i64, now_ms: i64) -> bool {
        match *self {
            Self::AllTime => true,
            Self::LastDays { days } => value >= now_ms - i64::from(days) * DAY_MS,
            Self::Custom { from, to } => {
                from.map_or(true, |from| value >= from) && to.map_or(true, |to| value <= to)
            }
        }
    }
}

/// Snapshot of every predicate parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Selected categories, normalized. Empty means "any".
    pub categories: BTreeSet<String>,
    /// Required value of the record's designated flag.
    pub flag: Option<bool>,
    /// Free-text query; matched case-insensitively as a substring.
    pub text: String,
    pub numeric: NumericRange,
    pub dates: DateRange,
}

impl FilterConfig {
    /// `true` when no predicate is active.
    pub fn is_identity(&self) -> bool {
        self.categories.is_empty()
            && self.flag.is_none()
            && normalize_query(&self.text).is_empty()
            && !self.numeric.is_active()
            && !self.dates.is_active()
    }

    /// Adds the category when absent, removes it when present.
    pub fn toggle_category(&mut self, category: &str) {
        let Some(normalized) = normalize_category(category) else {
            return;
        };
        if !self.categories.remove(&normalized) {
            self.categories.insert(normalized);
        }
    }

    /// Overwrites the fields the patch carries, leaving the rest untouched.
    pub fn apply(&mut self, patch: FilterPatch) {
        if let Some(categories) = patch.categories {
            self.categories = normalize_categories(categories);
        }
        if let Some(flag) = patch.flag {
            self.flag = flag;
        }
        if let Some(text) = patch.text {
            self.text = text;
        }
        if let Some(numeric) = patch.numeric {
            self.numeric = numeric;
        }
        if let Some(dates) = patch.dates {
            self.dates = dates;
        }
    }
}

/// Partial filter update; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterPatch {
    pub categories: Option<Vec<String>>,
    /// `Some(None)` clears the flag predicate.
    pub flag: Option<Option<bool>>,
    pub text: Option<String>,
    pub numeric: Option<NumericRange>,
    pub dates: Option<DateRange>,
}

impl FilterPatch {
    pub fn categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: Some(categories.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn flag(flag: Option<bool>) -> Self {
        Self {
            flag: Some(flag),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn numeric(numeric: NumericRange) -> Self {
        Self {
            numeric: Some(numeric),
            ..Self::default()
        }
    }

    pub fn dates(dates: DateRange) -> Self {
        Self {
            dates: Some(dates),
            ..Self::default()
        }
    }

    /// Splits off the free-text part, which the pipeline debounces.
    pub(crate) fn take_text(&mut self) -> Option<String> {
        self.text.take()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.categories.is_none()
            && self.flag.is_none()
            && self.text.is_none()
            && self.numeric.is_none()
            && self.dates.is_none()
    }
}

/// Predicates compiled from one `FilterConfig` at one instant.
#[derive(Debug)]
pub struct FilterPredicateSet<'a> {
    config: &'a FilterConfig,
    needle: String,
    now_ms: i64,
}

impl<'a> FilterPredicateSet<'a> {
    pub fn new(config: &'a FilterConfig, now_ms: i64) -> Self {
        Self {
            config,
            needle: normalize_query(&config.text).to_lowercase(),
            now_ms,
        }
    }

    pub fn matches<T: Queryable>(&self, record: &T) -> bool {
        self.category_matches(record)
            && self.flag_matches(record)
            && self.numeric_matches(record)
            && self.date_matches(record)
            && self.text_matches(record)
    }

    /// Keeps matching records in their input order.
    pub fn apply<'r, T, I>(&self, records: I) -> Vec<&'r T>
    where
        T: Queryable,
        I: IntoIterator<Item = &'r T>,
    {
        records
            .into_iter()
            .filter(|record| self.matches(*record))
            .collect()
    }

    pub fn category_matches<T: Queryable>(&self, record: &T) -> bool {
        if self.config.categories.is_empty() {
            return true;
        }
        record
            .categories()
            .into_iter()
            .filter_map(normalize_category)
            .any(|category| self.config.categories.contains(&category))
    }

    pub fn flag_matches<T: Queryable>(&self, record: &T) -> bool {
        match self.config.flag {
            None => true,
            Some(wanted) => record.flag() == Some(wanted),
        }
    }

    /// Records without a numeric value fail an active range.
    pub fn numeric_matches<T: Queryable>(&self, record: &T) -> bool {
        if !self.config.numeric.is_active() {
            return true;
        }
        record
            .numeric()
            .is_some_and(|value| self.config.numeric.contains(value))
    }

    /// Records without a date fail an active date window.
    pub fn date_matches<T: Queryable>(&self, record: &T) -> bool {
        if !self.config.dates.is_active() {
            return true;
        }
        record
            .date()
            .is_some_and(|value| self.config.dates.contains(value, self.now_ms))
    }

    pub fn text_matches<T: Queryable>(&self, record: &T) -> bool {
        if self.needle.is_empty() {
            return true;
        }
        record
            .search_fields()
            .into_iter()
            .any(|field| normalize_query(field).to_lowercase().contains(&self.needle))
    }
}

/// Trims and collapses inner whitespace of a search query.
pub fn normalize_query(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Lowercases, trims and collapses whitespace; blank input yields `None`.
pub fn normalize_category(value: &str) -> Option<String> {
    let normalized = normalize_query(value).to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalizes and deduplicates a category selection.
pub fn normalize_categories<I, S>(values: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter_map(|value| normalize_category(value.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_categories, normalize_category, DateRange, FilterConfig, FilterPatch,
        FilterPredicateSet, NumericRange,
    };
    use crate::clock::DAY_MS;
    use crate::model::pet::Pet;

    fn pet(name: &str, species: &str) -> Pet {
        let mut pet = Pet::new(name, species);
        pet.meta.created_at = 1_000;
        pet
    }

    #[test]
    fn category_normalization_trims_lowercases_and_dedups() {
        assert_eq!(normalize_category("  Big   Dog "), Some("big dog".to_string()));
        assert_eq!(normalize_category("   "), None);
        let set = normalize_categories(["Cat", "cat ", "", "Dog"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn empty_config_is_identity() {
        let config = FilterConfig::default();
        assert!(config.is_identity());
        let predicates = FilterPredicateSet::new(&config, 0);
        assert!(predicates.matches(&pet("Ava", "cat")));
    }

    #[test]
    fn whitespace_only_text_is_inactive() {
        let mut config = FilterConfig::default();
        config.apply(FilterPatch::text("   "));
        assert!(config.is_identity());
    }

    #[test]
    fn category_predicate_matches_case_insensitively() {
        let mut config = FilterConfig::default();
        config.apply(FilterPatch::categories(["DOG"]));
        let predicates = FilterPredicateSet::new(&config, 0);
        assert!(predicates.matches(&pet("Max", "Dog")));
        assert!(!predicates.matches(&pet("Ava", "cat")));
    }

    #[test]
    fn toggle_category_adds_then_removes() {
        let mut config = FilterConfig::default();
        config.toggle_category("Cat");
        assert!(config.categories.contains("cat"));
        config.toggle_category("cat");
        assert!(config.categories.is_empty());
    }

    #[test]
    fn text_predicate_searches_every_designated_field() {
        let mut ava = pet("Ava", "cat");
        ava.breed = Some("Maine Coon".to_string());
        let mut config = FilterConfig::default();
        config.apply(FilterPatch::text("coon"));
        let predicates = FilterPredicateSet::new(&config, 0);
        assert!(predicates.matches(&ava));
        assert!(!predicates.matches(&pet("Max", "dog")));
    }

    #[test]
    fn text_predicate_ignores_whitespace_runs_on_both_sides() {
        let mut rex = pet("Rex", "dog");
        rex.notes = "a big  dog\tfrom the\nshelter".to_string();
        for query in ["big  dog", "big dog", "dog from the shelter"] {
            let mut config = FilterConfig::default();
            config.apply(FilterPatch::text(query));
            let predicates = FilterPredicateSet::new(&config, 0);
            assert!(predicates.matches(&rex), "{query}");
        }
    }

    #[test]
    fn one_sided_numeric_range_is_open_on_missing_side() {
        let mut light = pet("Ava", "cat");
        light.weight_kg = Some(3.0);
        let mut heavy = pet("Max", "dog");
        heavy.weight_kg = Some(40.0);
        let unknown = pet("Bo", "dog");

        let mut config = FilterConfig::default();
        config.apply(FilterPatch::numeric(NumericRange::at_most(10.0)));
        let predicates = FilterPredicateSet::new(&config, 0);
        assert!(predicates.matches(&light));
        assert!(!predicates.matches(&heavy));
        assert!(!predicates.matches(&unknown));

        config.apply(FilterPatch::numeric(NumericRange::at_least(10.0)));
        let predicates = FilterPredicateSet::new(&config, 0);
        assert!(predicates.matches(&heavy));
        assert!(!predicates.matches(&light));
    }

    #[test]
    fn custom_date_range_filters_by_bounds() {
        let mut old = pet("Old", "cat");
        old.meta.created_at = 100;
        let mut recent = pet("Recent", "cat");
        recent.meta.created_at = 900;

        let mut config = FilterConfig::default();
        config.apply(FilterPatch::dates(DateRange::Custom {
            from: Some(500),
            to: Some(1_000),
        }));
        let predicates = FilterPredicateSet::new(&config, 5_000);
        assert!(!predicates.matches(&old));
        assert!(predicates.matches(&recent));
    }

    #[test]
    fn custom_date_range_with_only_upper_bound_is_not_all_time() {
        let mut old = pet("Old", "cat");
        old.meta.created_at = 100;
        let mut recent = pet("Recent", "cat");
        recent.meta.created_at = 900;

        let mut config = FilterConfig::default();
        config.apply(FilterPatch::dates(DateRange::Custom {
            from: None,
            to: Some(500),
        }));
        let predicates = FilterPredicateSet::new(&config, 5_000);
        assert!(predicates.matches(&old));
        assert!(!predicates.matches(&recent));
    }

    #[test]
    fn last_days_is_relative_to_now() {
        let now = 30 * DAY_MS;
        let mut fresh = pet("Fresh", "cat");
        fresh.meta.created_at = now - DAY_MS;
        let mut stale = pet("Stale", "cat");
        stale.meta.created_at = now - 10 * DAY_MS;

        let mut config = FilterConfig::default();
        config.apply(FilterPatch::dates(DateRange::LastDays { days: 7 }));
        let predicates = FilterPredicateSet::new(&config, now);
        assert!(predicates.matches(&fresh));
        assert!(!predicates.matches(&stale));
    }

    #[test]
    fn predicates_combine_with_and() {
        let mut fav_cat = pet("Ava", "cat");
        fav_cat.favorite = true;
        let plain_cat = pet("Mia", "cat");

        let mut config = FilterConfig::default();
        config.apply(FilterPatch {
            categories: Some(vec!["cat".to_string()]),
            flag: Some(Some(true)),
            ..FilterPatch::default()
        });
        let predicates = FilterPredicateSet::new(&config, 0);
        assert!(predicates.matches(&fav_cat));
        assert!(!predicates.matches(&plain_cat));
    }

    #[test]
    fn patch_leaves_unset_fields_alone() {
        let mut config = FilterConfig::default();
        config.apply(FilterPatch::flag(Some(true)));
        config.apply(FilterPatch::text("ava"));
        assert_eq!(config.flag, Some(true));
        config.apply(FilterPatch::flag(None));
        assert_eq!(config.flag, None);
        assert_eq!(config.text, "ava");
    }

    #[test]
    fn date_range_wire_shape_is_tagged() {
        let json = serde_json::to_value(DateRange::LastDays { days: 7 }).unwrap();
        assert_eq!(json["mode"], "last_days");
        assert_eq!(json["days"], 7);
    }
}
