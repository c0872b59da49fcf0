//! Candidate Filter: hard constraints that a bin must satisfy before it is
//! scored (putaway) or considered as a pick source (picking).
//!
//! An empty candidate set is a normal outcome. The tally of rejections tells
//! the caller why nothing qualified.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use slotwise_core::{HazardLevel, ItemId, TemperatureClass};

use crate::item::Item;
use crate::location::BinIdx;
use crate::topology::StorageTopology;

/// Per-request overrides of the item's own constraints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PutawayConstraints {
    /// Store in this temperature class instead of the item's required one.
    pub temperature: Option<TemperatureClass>,
    /// Treat the goods as this hazard level instead of the item's.
    pub hazard_level: Option<HazardLevel>,
    /// Maximum total weight (kg) the destination bin may reach.
    pub max_weight: Option<f64>,
}

/// Why a bin was excluded. Ordered by the sequence in which checks run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Status,
    Temperature,
    Hazard,
    Capacity,
    Weight,
    NoStock,
}

impl Rejection {
    pub fn describe(&self) -> &'static str {
        match self {
            Rejection::Status => "bin is not active",
            Rejection::Temperature => "zone temperature class does not match",
            Rejection::Hazard => "zone does not accept this hazard level",
            Rejection::Capacity => "no remaining capacity",
            Rejection::Weight => "weight limit would be exceeded",
            Rejection::NoStock => "bin does not hold the item",
        }
    }
}

/// Count of excluded bins per reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionTally {
    counts: BTreeMap<Rejection, usize>,
}

impl RejectionTally {
    pub fn record(&mut self, rejection: Rejection) {
        *self.counts.entry(rejection).or_default() += 1;
    }

    pub fn count(&self, rejection: Rejection) -> usize {
        self.counts.get(&rejection).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// The most frequent reason; earlier checks win ties.
    pub fn dominant(&self) -> Option<Rejection> {
        self.counts
            .iter()
            .max_by(|(ra, ca), (rb, cb)| ca.cmp(cb).then_with(|| rb.cmp(ra)))
            .map(|(r, _)| *r)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    pub bins: Vec<BinIdx>,
    pub rejected: RejectionTally,
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateFilter<'a> {
    topology: &'a StorageTopology,
}

impl<'a> CandidateFilter<'a> {
    pub fn new(topology: &'a StorageTopology) -> Self {
        Self { topology }
    }

    /// Check one bin against the putaway hard constraints.
    pub fn check_putaway(
        &self,
        bin: BinIdx,
        item: &Item,
        quantity: u32,
        constraints: &PutawayConstraints,
    ) -> Result<(), Rejection> {
        let t = self.topology;
        let b = t.bin(bin);
        let zone = t.zone_of(bin);

        if !b.is_active() {
            return Err(Rejection::Status);
        }
        let temperature = constraints
            .temperature
            .unwrap_or(item.required_temperature);
        if zone.temperature != temperature {
            return Err(Rejection::Temperature);
        }
        let hazard = constraints.hazard_level.unwrap_or(item.hazard_level);
        if hazard > zone.max_hazard {
            return Err(Rejection::Hazard);
        }
        if b.remaining_capacity() == 0 {
            return Err(Rejection::Capacity);
        }
        let limit = match (b.weight_limit, constraints.max_weight) {
            (Some(a), Some(c)) => Some(a.min(c)),
            (a, c) => a.or(c),
        };
        if let Some(limit) = limit {
            let projected = t.bin_weight(bin) + item.unit_weight * f64::from(quantity);
            if projected > limit {
                return Err(Rejection::Weight);
            }
        }
        Ok(())
    }

    pub fn putaway(
        &self,
        item: &Item,
        quantity: u32,
        constraints: &PutawayConstraints,
    ) -> Candidates {
        let mut out = Candidates::default();
        for (idx, _) in self.topology.bins() {
            match self.check_putaway(idx, item, quantity, constraints) {
                Ok(()) => out.bins.push(idx),
                Err(r) => out.rejected.record(r),
            }
        }
        out
    }

    /// Check one bin as a pick source for `item`.
    pub fn check_picking(&self, bin: BinIdx, item: ItemId) -> Result<(), Rejection> {
        let t = self.topology;
        if !t.bin(bin).is_active() {
            return Err(Rejection::Status);
        }
        if !t.batches(bin).iter().any(|b| b.item_id == item && b.quantity > 0) {
            return Err(Rejection::NoStock);
        }
        Ok(())
    }

    /// Bins that currently hold `item`. Bins without the item are not tallied.
    pub fn picking(&self, item: ItemId) -> Candidates {
        let mut out = Candidates::default();
        for (idx, _) in self.topology.bins() {
            match self.check_picking(idx, item) {
                Ok(()) => out.bins.push(idx),
                Err(Rejection::NoStock) => {}
                Err(r) => out.rejected.record(r),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotwise_core::BinId;

    use crate::bin::{Bin, BinItem, BinStatus};
    use crate::location::{Aisle, Rack, RackIdx, Zone, ZoneIdx};
    use crate::topology::TopologyBuilder;

    struct Fixture {
        topology: StorageTopology,
        ambient: Vec<BinId>,
        frozen: BinId,
        item: Item,
    }

    /// Ambient zone with three bins (one blocked, one full, one weight-rated)
    /// plus a frozen zone with one bin.
    fn fixture() -> Fixture {
        let mut b = StorageTopology::builder();
        let ambient_zone =
            b.zone(Zone::new("A", TemperatureClass::Ambient).with_max_hazard(HazardLevel::Low));
        let frozen_zone = b.zone(Zone::new("F", TemperatureClass::Frozen));
        fn rack_in(b: &mut TopologyBuilder, zone: ZoneIdx, code: &str) -> RackIdx {
            let aisle = b
                .aisle(Aisle {
                    zone,
                    code: format!("{code}-AISLE"),
                    position: 0,
                    width: 3.0,
                })
                .unwrap();
            b.rack(Rack {
                aisle,
                code: format!("{code}-RACK"),
                level: 0,
                row: 0,
                column: 0,
            })
            .unwrap()
        }
        let ambient_rack = rack_in(&mut b, ambient_zone, "A");
        let frozen_rack = rack_in(&mut b, frozen_zone, "F");

        let item = Item::new(ItemId::new(), "SKU", "dry", TemperatureClass::Ambient)
            .with_unit_weight(1.0);
        b.item(item.clone()).unwrap();

        let ambient: Vec<BinId> = (0..4).map(|_| BinId::new()).collect();
        b.bin(Bin::new(ambient[0], "A-0", ambient_rack, 50)).unwrap();
        b.bin(Bin::new(ambient[1], "A-1", ambient_rack, 50).with_status(BinStatus::Blocked))
            .unwrap();
        b.bin(Bin::new(ambient[2], "A-2", ambient_rack, 10)).unwrap();
        b.bin(Bin::new(ambient[3], "A-3", ambient_rack, 50).with_weight_limit(20.0))
            .unwrap();
        b.batch(BinItem::new(ambient[2], item.id, 10)).unwrap();

        let frozen = BinId::new();
        b.bin(Bin::new(frozen, "F-0", frozen_rack, 50)).unwrap();

        Fixture {
            topology: b.build().unwrap(),
            ambient,
            frozen,
            item,
        }
    }

    #[test]
    fn putaway_keeps_only_bins_meeting_every_hard_constraint() {
        let f = fixture();
        let filter = CandidateFilter::new(&f.topology);
        let out = filter.putaway(&f.item, 25, &PutawayConstraints::default());

        let ids: Vec<BinId> = out.bins.iter().map(|&i| f.topology.bin(i).id).collect();
        assert_eq!(ids, vec![f.ambient[0]]);
        assert_eq!(out.rejected.count(Rejection::Status), 1);
        assert_eq!(out.rejected.count(Rejection::Capacity), 1);
        assert_eq!(out.rejected.count(Rejection::Weight), 1);
        assert_eq!(out.rejected.count(Rejection::Temperature), 1);
        assert_eq!(out.rejected.total(), 4);
    }

    #[test]
    fn temperature_override_redirects_to_other_zone() {
        let f = fixture();
        let filter = CandidateFilter::new(&f.topology);
        let constraints = PutawayConstraints {
            temperature: Some(TemperatureClass::Frozen),
            ..PutawayConstraints::default()
        };
        let out = filter.putaway(&f.item, 5, &constraints);
        let ids: Vec<BinId> = out.bins.iter().map(|&i| f.topology.bin(i).id).collect();
        assert_eq!(ids, vec![f.frozen]);
        assert_eq!(out.rejected.dominant(), Some(Rejection::Temperature));
    }

    #[test]
    fn hazard_above_zone_limit_is_rejected() {
        let f = fixture();
        let filter = CandidateFilter::new(&f.topology);
        let constraints = PutawayConstraints {
            hazard_level: Some(HazardLevel::High),
            ..PutawayConstraints::default()
        };
        let out = filter.putaway(&f.item, 1, &constraints);
        assert!(out.is_empty());
        assert_eq!(out.rejected.count(Rejection::Hazard), 3);
    }

    #[test]
    fn request_weight_limit_tightens_bin_limit() {
        let f = fixture();
        let filter = CandidateFilter::new(&f.topology);
        let constraints = PutawayConstraints {
            max_weight: Some(4.0),
            ..PutawayConstraints::default()
        };
        assert!(filter.putaway(&f.item, 5, &constraints).is_empty());
        assert_eq!(filter.putaway(&f.item, 4, &constraints).bins.len(), 2);
    }

    #[test]
    fn picking_lists_active_bins_holding_the_item() {
        let f = fixture();
        let filter = CandidateFilter::new(&f.topology);
        let out = filter.picking(f.item.id);
        let ids: Vec<BinId> = out.bins.iter().map(|&i| f.topology.bin(i).id).collect();
        assert_eq!(ids, vec![f.ambient[2]]);
        assert_eq!(out.rejected.total(), 1);
    }

    #[test]
    fn dominant_prefers_earlier_checks_on_ties() {
        let mut tally = RejectionTally::default();
        tally.record(Rejection::Weight);
        tally.record(Rejection::Status);
        assert_eq!(tally.dominant(), Some(Rejection::Status));
        tally.record(Rejection::Weight);
        assert_eq!(tally.dominant(), Some(Rejection::Weight));
    }
}
