use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use slotwise_core::{BinId, ItemId, Priority};
use slotwise_inventory::{PutawayConstraints, Rejection, RejectionTally};

use crate::criteria::CompatibilityBracket;

/// Weighted points per criterion; the components sum to the total score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub utilization: f64,
    pub compatibility: f64,
    pub zone_efficiency: f64,
    pub accessibility: f64,
    pub fifo: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.utilization + self.compatibility + self.zone_efficiency + self.accessibility + self.fifo
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub bin_id: BinId,
    pub bin_code: String,
    pub location_path: String,
    /// Bin version observed when the candidate was scored.
    pub bin_version: u64,
    /// Whether the bin can hold the full requested quantity.
    pub fits: bool,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub compatibility: CompatibilityBracket,
    pub reasons: Vec<String>,
}

/// A chosen storage location plus the ranked runners-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementResult {
    pub item_id: ItemId,
    pub quantity: u32,
    pub priority: Priority,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// Hard constraints the candidates were filtered with.
    #[serde(default)]
    pub constraints: PutawayConstraints,
    pub chosen: ScoredCandidate,
    pub alternatives: Vec<ScoredCandidate>,
}

impl PlacementResult {
    pub fn bin_id(&self) -> BinId {
        self.chosen.bin_id
    }

    pub fn score(&self) -> f64 {
        self.chosen.score
    }

    pub fn location_path(&self) -> &str {
        &self.chosen.location_path
    }

    /// The chosen bin or one of the alternatives, if `bin_id` is among them.
    pub fn candidate(&self, bin_id: BinId) -> Option<&ScoredCandidate> {
        std::iter::once(&self.chosen)
            .chain(self.alternatives.iter())
            .find(|c| c.bin_id == bin_id)
    }
}

/// No bin can take the request. Reported as a value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoCandidate {
    pub reason: Rejection,
    pub rejected: RejectionTally,
    /// Bins that passed the hard constraints but could not hold the quantity.
    pub too_small: usize,
}

impl NoCandidate {
    pub fn message(&self) -> String {
        match self.reason {
            Rejection::Capacity if self.too_small > 0 => format!(
                "no suitable location: {} candidate bin(s) lack room for the full quantity",
                self.too_small
            ),
            reason => format!(
                "no suitable location: {} ({} of {} bins)",
                reason.describe(),
                self.rejected.count(reason),
                self.rejected.total() + self.too_small
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Placement {
    Found(PlacementResult),
    NoSuitableLocation(NoCandidate),
}

impl Placement {
    pub fn is_found(&self) -> bool {
        matches!(self, Placement::Found(_))
    }

    pub fn found(self) -> Option<PlacementResult> {
        match self {
            Placement::Found(result) => Some(result),
            Placement::NoSuitableLocation(_) => None,
        }
    }

    pub fn as_found(&self) -> Option<&PlacementResult> {
        match self {
            Placement::Found(result) => Some(result),
            Placement::NoSuitableLocation(_) => None,
        }
    }
}
