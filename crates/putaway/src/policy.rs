//! Tunable scoring policy for putaway.
//!
//! The defaults reproduce the reference weighting (30/25/20/15/10) and the
//! compatibility brackets (1.0/0.9/0.8/0.6/0.3). Exact values are policy;
//! `validate` only enforces the shape: weights sum to 100 and brackets keep
//! their relative order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolicyError {
    #[error("scoring weights must sum to 100, got {0}")]
    WeightSum(f64),

    #[error("scoring weight `{0}` must be a finite non-negative number")]
    InvalidWeight(&'static str),

    #[error("compatibility bracket `{0}` must lie in [0, 1]")]
    BracketRange(&'static str),

    #[error("compatibility brackets must be ordered same_item >= empty >= same_category >= few_categories >= mixed")]
    BracketOrder,

    #[error("{0}")]
    Invalid(String),
}

/// Points awarded per criterion. A criterion scoring 1.0 contributes its full
/// weight to the 0–100 total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub utilization: f64,
    pub compatibility: f64,
    pub zone_efficiency: f64,
    pub accessibility: f64,
    pub fifo: f64,
}

impl ScoringWeights {
    pub const DEFAULT_UTILIZATION: f64 = 30.0;
    pub const DEFAULT_COMPATIBILITY: f64 = 25.0;
    pub const DEFAULT_ZONE_EFFICIENCY: f64 = 20.0;
    pub const DEFAULT_ACCESSIBILITY: f64 = 15.0;
    pub const DEFAULT_FIFO: f64 = 10.0;

    pub fn total(&self) -> f64 {
        self.utilization + self.compatibility + self.zone_efficiency + self.accessibility + self.fifo
    }

    fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("utilization", self.utilization),
            ("compatibility", self.compatibility),
            ("zone_efficiency", self.zone_efficiency),
            ("accessibility", self.accessibility),
            ("fifo", self.fifo),
        ]
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            utilization: Self::DEFAULT_UTILIZATION,
            compatibility: Self::DEFAULT_COMPATIBILITY,
            zone_efficiency: Self::DEFAULT_ZONE_EFFICIENCY,
            accessibility: Self::DEFAULT_ACCESSIBILITY,
            fifo: Self::DEFAULT_FIFO,
        }
    }
}

/// Discrete compatibility lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityBrackets {
    pub same_item: f64,
    pub empty: f64,
    pub same_category: f64,
    pub few_categories: f64,
    pub mixed: f64,
    /// Largest number of distinct categories still counted as "few".
    pub few_category_limit: usize,
}

impl CompatibilityBrackets {
    pub const DEFAULT_SAME_ITEM: f64 = 1.0;
    pub const DEFAULT_EMPTY: f64 = 0.9;
    pub const DEFAULT_SAME_CATEGORY: f64 = 0.8;
    pub const DEFAULT_FEW_CATEGORIES: f64 = 0.6;
    pub const DEFAULT_MIXED: f64 = 0.3;
    pub const DEFAULT_FEW_CATEGORY_LIMIT: usize = 2;

    fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("same_item", self.same_item),
            ("empty", self.empty),
            ("same_category", self.same_category),
            ("few_categories", self.few_categories),
            ("mixed", self.mixed),
        ]
    }
}

impl Default for CompatibilityBrackets {
    fn default() -> Self {
        Self {
            same_item: Self::DEFAULT_SAME_ITEM,
            empty: Self::DEFAULT_EMPTY,
            same_category: Self::DEFAULT_SAME_CATEGORY,
            few_categories: Self::DEFAULT_FEW_CATEGORIES,
            mixed: Self::DEFAULT_MIXED,
            few_category_limit: Self::DEFAULT_FEW_CATEGORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub weights: ScoringWeights,
    pub compatibility: CompatibilityBrackets,
    /// Rack levels at or above this count score zero on the level term.
    pub max_levels: u32,
    /// Aisle width (metres) that earns the full width term.
    pub reference_aisle_width: f64,
    /// FIFO criterion value when an existing batch outlives the incoming one.
    pub fifo_violation: f64,
}

impl ScoringPolicy {
    pub const DEFAULT_MAX_LEVELS: u32 = 10;
    pub const DEFAULT_REFERENCE_AISLE_WIDTH: f64 = 3.0;
    pub const DEFAULT_FIFO_VIOLATION: f64 = 0.2;

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_compatibility(mut self, compatibility: CompatibilityBrackets) -> Self {
        self.compatibility = compatibility;
        self
    }

    pub fn with_max_levels(mut self, max_levels: u32) -> Self {
        self.max_levels = max_levels;
        self
    }

    pub fn with_reference_aisle_width(mut self, width: f64) -> Self {
        self.reference_aisle_width = width;
        self
    }

    pub fn with_fifo_violation(mut self, value: f64) -> Self {
        self.fifo_violation = value;
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for (name, w) in self.weights.named() {
            if !(w.is_finite() && w >= 0.0) {
                return Err(PolicyError::InvalidWeight(name));
            }
        }
        let total = self.weights.total();
        if (total - 100.0).abs() > 1e-6 {
            return Err(PolicyError::WeightSum(total));
        }

        let brackets = self.compatibility.named();
        for (name, v) in brackets {
            if !(0.0..=1.0).contains(&v) {
                return Err(PolicyError::BracketRange(name));
            }
        }
        if brackets.windows(2).any(|w| w[0].1 < w[1].1) {
            return Err(PolicyError::BracketOrder);
        }

        if self.max_levels == 0 {
            return Err(PolicyError::Invalid("max_levels must be positive".into()));
        }
        if !(self.reference_aisle_width.is_finite() && self.reference_aisle_width > 0.0) {
            return Err(PolicyError::Invalid(
                "reference_aisle_width must be a finite positive number".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fifo_violation) {
            return Err(PolicyError::Invalid("fifo_violation must lie in [0, 1]".into()));
        }
        Ok(())
    }
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            compatibility: CompatibilityBrackets::default(),
            max_levels: Self::DEFAULT_MAX_LEVELS,
            reference_aisle_width: Self::DEFAULT_REFERENCE_AISLE_WIDTH,
            fifo_violation: Self::DEFAULT_FIFO_VIOLATION,
        }
    }
}
