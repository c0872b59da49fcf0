//! The five placement criteria. Each is a pure function returning a value in
//! `[0, 1]`; the scorer multiplies by the policy weight.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::policy::CompatibilityBrackets;

/// How tightly `quantity` fills what is left of the bin.
///
/// `1 - (remaining - quantity) / capacity`, or zero when the quantity does
/// not fit.
pub fn utilization(capacity: u32, current_load: u32, quantity: u32) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    let remaining = capacity.saturating_sub(current_load);
    if quantity > remaining {
        return 0.0;
    }
    let leftover = f64::from(remaining - quantity);
    (1.0 - leftover / f64::from(capacity)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilityBracket {
    SameItem,
    Empty,
    SameCategory,
    FewCategories,
    Mixed,
}

impl CompatibilityBracket {
    /// Classify a bin by its current contents.
    pub fn classify(
        holds_same_item: bool,
        categories: &BTreeSet<&str>,
        item_category: &str,
        brackets: &CompatibilityBrackets,
    ) -> Self {
        if holds_same_item {
            CompatibilityBracket::SameItem
        } else if categories.is_empty() {
            CompatibilityBracket::Empty
        } else if categories.len() == 1 && categories.contains(item_category) {
            CompatibilityBracket::SameCategory
        } else if categories.len() <= brackets.few_category_limit {
            CompatibilityBracket::FewCategories
        } else {
            CompatibilityBracket::Mixed
        }
    }

    pub fn value(self, brackets: &CompatibilityBrackets) -> f64 {
        match self {
            CompatibilityBracket::SameItem => brackets.same_item,
            CompatibilityBracket::Empty => brackets.empty,
            CompatibilityBracket::SameCategory => brackets.same_category,
            CompatibilityBracket::FewCategories => brackets.few_categories,
            CompatibilityBracket::Mixed => brackets.mixed,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            CompatibilityBracket::SameItem => "bin already stores this item",
            CompatibilityBracket::Empty => "bin is empty",
            CompatibilityBracket::SameCategory => "bin holds only the same category",
            CompatibilityBracket::FewCategories => "bin holds few categories",
            CompatibilityBracket::Mixed => "mixed-category bin",
        }
    }
}

pub fn compatibility(
    holds_same_item: bool,
    categories: &BTreeSet<&str>,
    item_category: &str,
    brackets: &CompatibilityBrackets,
) -> f64 {
    CompatibilityBracket::classify(holds_same_item, categories, item_category, brackets)
        .value(brackets)
}

/// Share of the zone's bins that are currently non-empty.
pub fn zone_efficiency(occupied_bins: usize, zone_bins: usize) -> f64 {
    if zone_bins == 0 {
        return 0.0;
    }
    (occupied_bins as f64 / zone_bins as f64).clamp(0.0, 1.0)
}

/// Mean of a rack-level term (ground level best) and an aisle-width term.
pub fn accessibility(level: u32, aisle_width: f64, max_levels: u32, reference_width: f64) -> f64 {
    let max_levels = max_levels.max(1);
    let level_term = 1.0 - f64::from(level.min(max_levels)) / f64::from(max_levels);
    let width_term = if reference_width > 0.0 && aisle_width.is_finite() {
        (aisle_width / reference_width).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (level_term + width_term) / 2.0
}

/// 1.0 when the incoming batch expires no earlier than every dated batch
/// already in the bin, `violation` otherwise. Undated batches never violate.
pub fn fifo<I>(incoming: Option<NaiveDate>, existing: I, violation: f64) -> f64
where
    I: IntoIterator<Item = Option<NaiveDate>>,
{
    let Some(incoming) = incoming else {
        return 1.0;
    };
    if existing.into_iter().flatten().all(|e| e <= incoming) {
        1.0
    } else {
        violation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn utilization_rewards_tight_fit() {
        assert!((utilization(100, 0, 40) - 0.4).abs() < 1e-12);
        assert_eq!(utilization(100, 60, 40), 1.0);
        assert!(utilization(100, 50, 40) > utilization(100, 0, 40));
    }

    #[test]
    fn utilization_is_zero_on_overflow() {
        assert_eq!(utilization(100, 70, 40), 0.0);
        assert_eq!(utilization(0, 0, 1), 0.0);
    }

    #[test]
    fn compatibility_brackets() {
        let b = CompatibilityBrackets::default();
        let none = BTreeSet::new();
        let dry: BTreeSet<&str> = ["dry"].into();
        let two: BTreeSet<&str> = ["dry", "frozen"].into();
        let three: BTreeSet<&str> = ["dry", "frozen", "bulk"].into();

        assert_eq!(compatibility(true, &dry, "dry", &b), 1.0);
        assert_eq!(compatibility(false, &none, "dry", &b), 0.9);
        assert_eq!(compatibility(false, &dry, "dry", &b), 0.8);
        assert_eq!(compatibility(false, &dry, "bulk", &b), 0.6);
        assert_eq!(compatibility(false, &two, "dry", &b), 0.6);
        assert_eq!(compatibility(false, &three, "dry", &b), 0.3);
    }

    #[test]
    fn zone_efficiency_handles_empty_zone() {
        assert_eq!(zone_efficiency(0, 0), 0.0);
        assert_eq!(zone_efficiency(3, 4), 0.75);
    }

    #[test]
    fn accessibility_prefers_low_levels_and_wide_aisles() {
        assert_eq!(accessibility(0, 3.0, 10, 3.0), 1.0);
        assert_eq!(accessibility(0, 6.0, 10, 3.0), 1.0);
        assert_eq!(accessibility(5, 1.5, 10, 3.0), 0.5);
        assert_eq!(accessibility(12, 0.0, 10, 3.0), 0.0);
    }

    #[test]
    fn fifo_penalises_batches_that_outlive_incoming() {
        let existing = [Some(date(2024, 6, 1)), None];
        assert_eq!(fifo(Some(date(2024, 7, 1)), existing, 0.2), 1.0);
        assert_eq!(fifo(Some(date(2024, 6, 1)), existing, 0.2), 1.0);
        assert_eq!(fifo(Some(date(2024, 5, 1)), existing, 0.2), 0.2);
        assert_eq!(fifo(None, existing, 0.2), 1.0);
        assert_eq!(fifo(Some(date(2024, 5, 1)), Vec::new(), 0.2), 1.0);
    }
}
