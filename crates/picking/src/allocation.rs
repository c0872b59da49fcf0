//! Choose source batches for each pick line.
//!
//! Sources are taken greedily: earliest expiry first (undated batches last),
//! then the bin nearest the previously allocated stop, then bin code.
//! Quantities handed out are reserved so later lines cannot claim the same
//! units.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;

use slotwise_core::{ItemId, Versioned};
use slotwise_inventory::{BinIdx, CandidateFilter, StorageTopology};

use crate::distance::{DistanceMetric, Point};

/// Quantity drawn from one batch in one bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub bin: BinIdx,
    pub bin_version: u64,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: u32,
    pub position: Point,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineAllocation {
    pub allocations: Vec<Allocation>,
    pub shortfall: u32,
}

impl LineAllocation {
    pub fn allocated(&self) -> u32 {
        self.allocations.iter().map(|a| a.quantity).sum()
    }
}

type BatchKey = (BinIdx, ItemId, Option<String>);

/// Units already promised to earlier lines of the same plan.
#[derive(Debug, Clone, Default)]
pub struct Reservations {
    taken: HashMap<BatchKey, u32>,
}

impl Reservations {
    pub fn reserved(&self, bin: BinIdx, item: ItemId, batch: Option<&str>) -> u32 {
        self.taken
            .get(&(bin, item, batch.map(str::to_owned)))
            .copied()
            .unwrap_or(0)
    }

    fn reserve(&mut self, bin: BinIdx, item: ItemId, batch: Option<String>, quantity: u32) {
        *self.taken.entry((bin, item, batch)).or_default() += quantity;
    }
}

struct Source {
    bin: BinIdx,
    batch_number: Option<String>,
    expiry_date: Option<NaiveDate>,
    available: u32,
    position: Point,
}

/// Dated batches first, earliest first.
fn expiry_order(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Allocate `quantity` of `item` starting from `anchor`.
///
/// `position` maps a bin to its floor coordinates.
pub fn allocate_line(
    topology: &StorageTopology,
    item: ItemId,
    quantity: u32,
    anchor: Point,
    metric: DistanceMetric,
    reservations: &mut Reservations,
    position: impl Fn(BinIdx) -> Point,
) -> LineAllocation {
    let filter = CandidateFilter::new(topology);
    let mut sources: Vec<Source> = filter
        .picking(item)
        .bins
        .into_iter()
        .flat_map(|bin| {
            topology
                .batches(bin)
                .iter()
                .filter(move |b| b.item_id == item)
                .map(move |b| (bin, b))
        })
        .filter_map(|(bin, batch)| {
            let held = reservations.reserved(bin, item, batch.batch_number.as_deref());
            let available = batch.quantity.saturating_sub(held);
            (available > 0).then(|| Source {
                bin,
                batch_number: batch.batch_number.clone(),
                expiry_date: batch.expiry_date,
                available,
                position: position(bin),
            })
        })
        .collect();

    let mut out = LineAllocation::default();
    let mut remaining = quantity;
    let mut here = anchor;

    while remaining > 0 && !sources.is_empty() {
        let best = sources
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                expiry_order(a.expiry_date, b.expiry_date)
                    .then_with(|| {
                        metric
                            .between(here, a.position)
                            .total_cmp(&metric.between(here, b.position))
                    })
                    .then_with(|| topology.bin(a.bin).code.cmp(&topology.bin(b.bin).code))
                    .then_with(|| a.batch_number.cmp(&b.batch_number))
            })
            .map(|(i, _)| i);
        let Some(i) = best else { break };
        let source = sources.swap_remove(i);

        let take = source.available.min(remaining);
        reservations.reserve(source.bin, item, source.batch_number.clone(), take);
        remaining -= take;
        here = source.position;
        out.allocations.push(Allocation {
            bin: source.bin,
            bin_version: topology.bin(source.bin).version(),
            batch_number: source.batch_number,
            expiry_date: source.expiry_date,
            quantity: take,
            position: source.position,
        });
    }

    out.shortfall = remaining;
    out
}
