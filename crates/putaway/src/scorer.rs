use std::cmp::Ordering;

use tracing::debug;

use slotwise_core::{DomainError, DomainResult, Versioned};
use slotwise_inventory::{BinIdx, CandidateFilter, Item, Rejection, StorageTopology};

use crate::criteria::{self, CompatibilityBracket};
use crate::policy::ScoringPolicy;
use crate::request::PutawayRequest;
use crate::result::{NoCandidate, Placement, PlacementResult, ScoreBreakdown, ScoredCandidate};

/// Ranks candidate bins for a putaway request.
///
/// Scoring reads only the topology snapshot it is given. Two calls with the
/// same snapshot and request return the same ranking.
///
/// Model:
/// - Filter bins by hard constraints.
/// - Score each candidate on five weighted criteria (0–100).
/// - Sort by score descending, then bin code ascending.
/// - Select the best bin that can hold the full quantity.
#[derive(Debug, Clone)]
pub struct PlacementScorer {
    policy: ScoringPolicy,
    /// Runners-up carried in a result.
    alternatives: usize,
}

impl Default for PlacementScorer {
    fn default() -> Self {
        Self::new(ScoringPolicy::default())
    }
}

impl PlacementScorer {
    pub const DEFAULT_ALTERNATIVES: usize = 5;

    pub fn new(policy: ScoringPolicy) -> Self {
        Self {
            policy,
            alternatives: Self::DEFAULT_ALTERNATIVES,
        }
    }

    pub fn with_alternatives(mut self, alternatives: usize) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Score a single bin. Does not apply the hard constraints.
    pub fn score_bin(
        &self,
        topology: &StorageTopology,
        bin: BinIdx,
        item: &Item,
        request: &PutawayRequest,
    ) -> ScoredCandidate {
        let p = &self.policy;
        let w = &p.weights;
        let b = topology.bin(bin);
        let zone_idx = topology.zone_idx_of(bin);
        let zone = topology.zone(zone_idx);
        let rack = topology.rack_of(bin);
        let aisle = topology.aisle_of(bin);
        let mut reasons = Vec::with_capacity(5);

        let fits = request.quantity <= b.remaining_capacity();
        let utilization = criteria::utilization(b.capacity, b.current_load(), request.quantity);
        if fits {
            let after = f64::from(b.current_load() + request.quantity) / f64::from(b.capacity);
            reasons.push(format!("fills bin to {:.0}% of capacity", after * 100.0));
        } else {
            reasons.push(format!(
                "cannot hold {} units ({} free)",
                request.quantity,
                b.remaining_capacity()
            ));
        }

        let categories = topology.categories_in(bin);
        let bracket = CompatibilityBracket::classify(
            topology.holds_item(bin, item.id),
            &categories,
            &item.category,
            &p.compatibility,
        );
        let compatibility = bracket.value(&p.compatibility);
        reasons.push(bracket.describe().to_string());

        let zone_bins = topology.zone_bins(zone_idx);
        let occupied = zone_bins
            .iter()
            .filter(|&&z| !topology.bin(z).is_empty())
            .count();
        let zone_efficiency = criteria::zone_efficiency(occupied, zone_bins.len());
        reasons.push(format!(
            "zone {} is {:.0}% occupied",
            zone.code,
            zone_efficiency * 100.0
        ));

        let accessibility = criteria::accessibility(
            rack.level,
            aisle.width,
            p.max_levels,
            p.reference_aisle_width,
        );
        reasons.push(format!(
            "rack level {}, aisle width {:.1} m",
            rack.level, aisle.width
        ));

        let fifo = criteria::fifo(
            request.expiry_date,
            topology.batches(bin).iter().map(|batch| batch.expiry_date),
            p.fifo_violation,
        );
        if fifo < 1.0 {
            reasons.push("an existing batch expires after the incoming one".to_string());
        } else {
            reasons.push("FIFO compliant".to_string());
        }

        let breakdown = ScoreBreakdown {
            utilization: utilization * w.utilization,
            compatibility: compatibility * w.compatibility,
            zone_efficiency: zone_efficiency * w.zone_efficiency,
            accessibility: accessibility * w.accessibility,
            fifo: fifo * w.fifo,
        };

        ScoredCandidate {
            bin_id: b.id,
            bin_code: b.code.clone(),
            location_path: topology.location_path(bin),
            bin_version: b.version(),
            fits,
            score: breakdown.total(),
            breakdown,
            compatibility: bracket,
            reasons,
        }
    }

    /// Score and sort `bins`, best first.
    pub fn rank(
        &self,
        topology: &StorageTopology,
        bins: &[BinIdx],
        item: &Item,
        request: &PutawayRequest,
    ) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = bins
            .iter()
            .map(|&bin| self.score_bin(topology, bin, item, request))
            .collect();
        scored.sort_by(compare_candidates);
        scored
    }

    /// Filter, score and select a bin for `request`.
    ///
    /// Unknown items are an error; an empty candidate set is a
    /// [`Placement::NoSuitableLocation`] value.
    pub fn find_placement(
        &self,
        topology: &StorageTopology,
        request: &PutawayRequest,
    ) -> DomainResult<Placement> {
        request.validate()?;
        let item = topology
            .item(request.item_id)
            .ok_or_else(|| DomainError::not_found(format!("item {}", request.item_id)))?;

        let candidates =
            CandidateFilter::new(topology).putaway(item, request.quantity, &request.constraints);
        debug!(
            item_id = %request.item_id,
            candidates = candidates.bins.len(),
            rejected = candidates.rejected.total(),
            "putaway candidates filtered"
        );

        let ranked = self.rank(topology, &candidates.bins, item, request);
        let (fitting, too_small): (Vec<_>, Vec<_>) = ranked.into_iter().partition(|c| c.fits);

        let mut fitting = fitting.into_iter();
        let Some(chosen) = fitting.next() else {
            let reason = if too_small.is_empty() {
                candidates.rejected.dominant().unwrap_or(Rejection::Capacity)
            } else {
                Rejection::Capacity
            };
            return Ok(Placement::NoSuitableLocation(NoCandidate {
                reason,
                rejected: candidates.rejected,
                too_small: too_small.len(),
            }));
        };

        debug!(
            bin = %chosen.bin_code,
            score = chosen.score,
            "putaway location selected"
        );

        Ok(Placement::Found(PlacementResult {
            item_id: request.item_id,
            quantity: request.quantity,
            priority: request.priority,
            batch_number: request.batch_number.clone(),
            expiry_date: request.expiry_date,
            constraints: request.constraints,
            chosen,
            alternatives: fitting.take(self.alternatives).collect(),
        }))
    }
}

/// Higher score first; scores equal to six decimals fall back to bin code.
fn compare_candidates(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    quantize(b.score)
        .cmp(&quantize(a.score))
        .then_with(|| a.bin_code.cmp(&b.bin_code))
}

fn quantize(score: f64) -> i64 {
    (score * 1e6).round() as i64
}
