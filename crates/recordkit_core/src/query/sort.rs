//! Sort options and the comparator behind them.
//!
//! # Invariants
//! - Every order is total: ties fall back to `created_at`, then to input
//!   position, so sorting is deterministic and idempotent.
//! - "Date added" orders use `created_at`, never identifier text.
//! - Absent numeric/date values sort lowest (first ascending, last
//!   descending).
//! - Sorting returns a new sequence; the input is not reordered.

use crate::model::entity::Queryable;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Fixed set of orders a UI can pick from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOption {
    NameAsc,
    NameDesc,
    #[default]
    NewestFirst,
    OldestFirst,
    DateAsc,
    DateDesc,
    ValueAsc,
    ValueDesc,
    /// Category, then name within a category.
    CategoryThenName,
}

impl SortOption {
    pub const ALL: [SortOption; 9] = [
        Self::NameAsc,
        Self::NameDesc,
        Self::NewestFirst,
        Self::OldestFirst,
        Self::DateAsc,
        Self::DateDesc,
        Self::ValueAsc,
        Self::ValueDesc,
        Self::CategoryThenName,
    ];

    /// Compares on this option's keys only; ties are resolved by
    /// [`sort_records`].
    pub fn compare<T: Queryable>(self, a: &T, b: &T) -> Ordering {
        match self {
            Self::NameAsc => compare_text(a.display_name(), b.display_name()),
            Self::NameDesc => compare_text(b.display_name(), a.display_name()),
            Self::NewestFirst => b.created_at().cmp(&a.created_at()),
            Self::OldestFirst => a.created_at().cmp(&b.created_at()),
            Self::DateAsc => a.date().cmp(&b.date()),
            Self::DateDesc => b.date().cmp(&a.date()),
            Self::ValueAsc => compare_numeric(a.numeric(), b.numeric()),
            Self::ValueDesc => compare_numeric(b.numeric(), a.numeric()),
            Self::CategoryThenName => compare_text(
                a.categories().first().copied().unwrap_or(""),
                b.categories().first().copied().unwrap_or(""),
            )
            .then_with(|| compare_text(a.display_name(), b.display_name())),
        }
    }
}

/// Returns `records` ordered by `option` with explicit tie-breaks.
pub fn sort_records<'r, T, I>(records: I, option: SortOption) -> Vec<&'r T>
where
    T: Queryable,
    I: IntoIterator<Item = &'r T>,
{
    let mut indexed: Vec<(usize, &'r T)> = records.into_iter().enumerate().collect();
    indexed.sort_by(|(pos_a, a), (pos_b, b)| {
        option
            .compare(*a, *b)
            .then_with(|| a.created_at().cmp(&b.created_at()))
            .then_with(|| pos_a.cmp(pos_b))
    });
    indexed.into_iter().map(|(_, record)| record).collect()
}

/// Case-insensitive lexicographic comparison without allocating.
pub fn compare_text(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// `None` is the lowest value; floats use IEEE total order.
pub fn compare_numeric(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.total_cmp(&b),
    }
}

#[cfg(test)]
mod tests {
    use super::{compare_text, sort_records, SortOption};
    use crate::model::pet::Pet;
    use std::cmp::Ordering;

    fn pet(name: &str, species: &str, created_at: i64, weight: Option<f64>) -> Pet {
        let mut pet = Pet::new(name, species);
        pet.meta.created_at = created_at;
        pet.weight_kg = weight;
        pet
    }

    fn names(sorted: &[&Pet]) -> Vec<String> {
        sorted.iter().map(|pet| pet.name.clone()).collect()
    }

    #[test]
    fn text_comparison_ignores_case() {
        assert_eq!(compare_text("ava", "AVA"), Ordering::Equal);
        assert_eq!(compare_text("ava", "Bo"), Ordering::Less);
    }

    #[test]
    fn name_ties_fall_back_to_creation_time() {
        let pets = vec![
            pet("max", "dog", 30, None),
            pet("Ava", "cat", 20, None),
            pet("Max", "dog", 10, None),
        ];
        let sorted = sort_records(&pets, SortOption::NameAsc);
        assert_eq!(names(&sorted), ["Ava", "Max", "max"]);
    }

    #[test]
    fn full_ties_keep_input_order() {
        let pets = vec![pet("Bo", "dog", 5, None), pet("bo", "dog", 5, None)];
        let sorted = sort_records(&pets, SortOption::NameDesc);
        assert_eq!(names(&sorted), ["Bo", "bo"]);
    }

    #[test]
    fn newest_first_uses_creation_time_not_id() {
        let pets = vec![
            pet("first", "cat", 100, None),
            pet("third", "cat", 300, None),
            pet("second", "cat", 200, None),
        ];
        let sorted = sort_records(&pets, SortOption::NewestFirst);
        assert_eq!(names(&sorted), ["third", "second", "first"]);
    }

    #[test]
    fn missing_values_sort_lowest() {
        let pets = vec![
            pet("heavy", "dog", 1, Some(30.0)),
            pet("unknown", "dog", 2, None),
            pet("light", "cat", 3, Some(3.5)),
        ];
        assert_eq!(
            names(&sort_records(&pets, SortOption::ValueAsc)),
            ["unknown", "light", "heavy"]
        );
        assert_eq!(
            names(&sort_records(&pets, SortOption::ValueDesc)),
            ["heavy", "light", "unknown"]
        );
    }

    #[test]
    fn category_then_name() {
        let pets = vec![
            pet("Rex", "dog", 1, None),
            pet("Mia", "cat", 2, None),
            pet("Ace", "dog", 3, None),
        ];
        let sorted = sort_records(&pets, SortOption::CategoryThenName);
        assert_eq!(names(&sorted), ["Mia", "Ace", "Rex"]);
    }

    #[test]
    fn sorting_is_idempotent_for_every_option() {
        let pets = vec![
            pet("b", "dog", 2, Some(1.0)),
            pet("a", "cat", 2, None),
            pet("B", "dog", 1, Some(1.0)),
            pet("c", "cat", 3, Some(0.5)),
        ];
        for option in SortOption::ALL {
            let once = sort_records(&pets, option);
            let twice = sort_records(once.iter().copied(), option);
            assert_eq!(names(&once), names(&twice), "{option:?}");
        }
    }

    #[test]
    fn sorting_leaves_input_untouched() {
        let pets = vec![pet("b", "dog", 2, None), pet("a", "cat", 1, None)];
        let _ = sort_records(&pets, SortOption::NameAsc);
        assert_eq!(pets[0].name, "b");
    }
}
