//! Putaway: choose where incoming stock should be stored.

pub mod criteria;
pub mod policy;
pub mod request;
pub mod result;
pub mod scorer;

pub use criteria::CompatibilityBracket;
pub use policy::{CompatibilityBrackets, PolicyError, ScoringPolicy, ScoringWeights};
pub use request::PutawayRequest;
pub use result::{NoCandidate, Placement, PlacementResult, ScoreBreakdown, ScoredCandidate};
pub use scorer::PlacementScorer;
