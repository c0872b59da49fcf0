//! Storage Topology Index.
//!
//! The warehouse hierarchy is held as flat arena tables (zones, aisles, racks,
//! bins) linked by integer handles, plus hash indexes from public identifiers
//! to rows. A `StorageTopology` value is a snapshot: scoring and planning read
//! it freely, and only the persistence layer mutates its own copy through
//! [`StorageTopology::apply`].

use std::collections::{BTreeSet, HashMap, HashSet};

use slotwise_core::{BinId, DomainError, DomainResult, ExpectedVersion, ItemId};

use crate::bin::{Bin, BinItem, BinStatus};
use crate::item::Item;
use crate::location::{Aisle, AisleIdx, BinIdx, Rack, RackIdx, Zone, ZoneIdx};
use crate::stock::{AppliedChange, StockChange, StockError};

#[derive(Debug, Clone, Default)]
pub struct StorageTopology {
    zones: Vec<Zone>,
    aisles: Vec<Aisle>,
    racks: Vec<Rack>,
    bins: Vec<Bin>,
    /// Batches owned by each bin, parallel to `bins`.
    batches: Vec<Vec<BinItem>>,
    /// Zone of each bin, parallel to `bins`.
    bin_zone: Vec<ZoneIdx>,
    zone_bins: Vec<Vec<BinIdx>>,
    items: Vec<Item>,
    bin_index: HashMap<BinId, BinIdx>,
    item_index: HashMap<ItemId, usize>,
}

impl StorageTopology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    pub fn zones(&self) -> impl Iterator<Item = (ZoneIdx, &Zone)> + '_ {
        self.zones
            .iter()
            .enumerate()
            .map(|(i, z)| (ZoneIdx(i as u32), z))
    }

    pub fn zone(&self, idx: ZoneIdx) -> &Zone {
        &self.zones[idx.index()]
    }

    pub fn aisles(&self) -> impl Iterator<Item = (AisleIdx, &Aisle)> + '_ {
        self.aisles
            .iter()
            .enumerate()
            .map(|(i, a)| (AisleIdx(i as u32), a))
    }

    pub fn racks(&self) -> impl Iterator<Item = (RackIdx, &Rack)> + '_ {
        self.racks
            .iter()
            .enumerate()
            .map(|(i, r)| (RackIdx(i as u32), r))
    }

    pub fn aisle(&self, idx: AisleIdx) -> &Aisle {
        &self.aisles[idx.index()]
    }

    pub fn rack(&self, idx: RackIdx) -> &Rack {
        &self.racks[idx.index()]
    }

    pub fn bin(&self, idx: BinIdx) -> &Bin {
        &self.bins[idx.index()]
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub fn bins(&self) -> impl Iterator<Item = (BinIdx, &Bin)> + '_ {
        self.bins
            .iter()
            .enumerate()
            .map(|(i, b)| (BinIdx(i as u32), b))
    }

    pub fn bin_idx(&self, id: BinId) -> Option<BinIdx> {
        self.bin_index.get(&id).copied()
    }

    pub fn bin_by_id(&self, id: BinId) -> Option<&Bin> {
        self.bin_idx(id).map(|idx| self.bin(idx))
    }

    pub fn bin_by_code(&self, code: &str) -> Option<BinIdx> {
        self.bins().find(|(_, b)| b.code == code).map(|(idx, _)| idx)
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.item_index.get(&id).map(|&i| &self.items[i])
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn rack_of(&self, bin: BinIdx) -> &Rack {
        self.rack(self.bin(bin).rack)
    }

    pub fn aisle_of(&self, bin: BinIdx) -> &Aisle {
        self.aisle(self.rack_of(bin).aisle)
    }

    pub fn zone_idx_of(&self, bin: BinIdx) -> ZoneIdx {
        self.bin_zone[bin.index()]
    }

    pub fn zone_of(&self, bin: BinIdx) -> &Zone {
        self.zone(self.zone_idx_of(bin))
    }

    /// Human-readable address, e.g. `A/A-01/R-03/B-0007`.
    pub fn location_path(&self, bin: BinIdx) -> String {
        format!(
            "{}/{}/{}/{}",
            self.zone_of(bin).code,
            self.aisle_of(bin).code,
            self.rack_of(bin).code,
            self.bin(bin).code
        )
    }

    pub fn batches(&self, bin: BinIdx) -> &[BinItem] {
        &self.batches[bin.index()]
    }

    pub fn zone_bins(&self, zone: ZoneIdx) -> &[BinIdx] {
        &self.zone_bins[zone.index()]
    }

    /// Fraction of the zone's bins that currently hold stock.
    pub fn zone_occupancy(&self, zone: ZoneIdx) -> f64 {
        let bins = self.zone_bins(zone);
        if bins.is_empty() {
            return 0.0;
        }
        let occupied = bins.iter().filter(|&&b| !self.bin(b).is_empty()).count();
        occupied as f64 / bins.len() as f64
    }

    /// Current stored weight in kilograms (unknown items weigh nothing).
    pub fn bin_weight(&self, bin: BinIdx) -> f64 {
        self.batches(bin)
            .iter()
            .map(|b| {
                let unit = self.item(b.item_id).map(|i| i.unit_weight).unwrap_or(0.0);
                unit * f64::from(b.quantity)
            })
            .sum()
    }

    /// Distinct item categories currently stored in the bin.
    pub fn categories_in(&self, bin: BinIdx) -> BTreeSet<&str> {
        self.batches(bin)
            .iter()
            .filter_map(|b| self.item(b.item_id).map(|i| i.category.as_str()))
            .collect()
    }

    pub fn holds_item(&self, bin: BinIdx, item: ItemId) -> bool {
        self.batches(bin).iter().any(|b| b.item_id == item)
    }

    /// Every batch of `item` across the warehouse.
    pub fn holdings(&self, item: ItemId) -> Vec<(BinIdx, &BinItem)> {
        self.bins()
            .flat_map(|(idx, _)| {
                self.batches(idx)
                    .iter()
                    .filter(move |b| b.item_id == item)
                    .map(move |b| (idx, b))
            })
            .collect()
    }

    pub fn stock_of(&self, item: ItemId) -> u64 {
        self.holdings(item)
            .iter()
            .map(|(_, b)| u64::from(b.quantity))
            .sum()
    }

    /// Verify `load == Σ batch quantities <= capacity` for every bin.
    pub fn check_invariants(&self) -> DomainResult<()> {
        for (idx, bin) in self.bins() {
            let stored: u64 = self
                .batches(idx)
                .iter()
                .map(|b| u64::from(b.quantity))
                .sum();
            if stored != u64::from(bin.current_load) {
                return Err(DomainError::invariant(format!(
                    "bin {} load {} does not match stored batches {}",
                    bin.code, bin.current_load, stored
                )));
            }
            if bin.current_load > bin.capacity {
                return Err(DomainError::invariant(format!(
                    "bin {} load {} exceeds capacity {}",
                    bin.code, bin.current_load, bin.capacity
                )));
            }
            if self.batches(idx).iter().any(|b| b.quantity == 0) {
                return Err(DomainError::invariant(format!(
                    "bin {} keeps an empty batch",
                    bin.code
                )));
            }
        }
        Ok(())
    }

    /// Apply a stock change to one bin.
    ///
    /// Everything is validated against the current state before anything is
    /// written, so on error the topology is untouched. On success the bin's
    /// load and its batch move together and the bin version is bumped.
    pub fn apply(
        &mut self,
        bin_id: BinId,
        expected: ExpectedVersion,
        change: &StockChange,
    ) -> Result<AppliedChange, StockError> {
        let idx = self.bin_idx(bin_id).ok_or(StockError::BinNotFound(bin_id))?;
        let i = idx.index();
        let quantity = change.quantity();
        let item_id = change.item_id();

        {
            let bin = &self.bins[i];
            if !expected.matches(bin.version) {
                return Err(StockError::StaleVersion {
                    bin: bin.code.clone(),
                    expected: match expected {
                        ExpectedVersion::Exact(v) => v,
                        ExpectedVersion::Any => bin.version,
                    },
                    actual: bin.version,
                });
            }
            if !bin.is_active() {
                return Err(StockError::BinUnavailable {
                    bin: bin.code.clone(),
                    status: bin.status.as_str(),
                });
            }
        }
        if quantity == 0 {
            return Err(StockError::InvalidQuantity);
        }
        if !self.item_index.contains_key(&item_id) {
            return Err(StockError::ItemNotFound(item_id));
        }

        let batch_quantity = match change {
            StockChange::Receive {
                batch_number,
                expiry_date,
                ..
            } => {
                let available = self.bins[i].remaining_capacity();
                if quantity > available {
                    return Err(StockError::InsufficientCapacity {
                        bin: self.bins[i].code.clone(),
                        requested: quantity,
                        available,
                    });
                }
                let batches = &mut self.batches[i];
                match batches
                    .iter()
                    .position(|b| b.is_batch(item_id, batch_number.as_deref()))
                {
                    Some(p) => {
                        let existing = &mut batches[p];
                        existing.quantity += quantity;
                        if existing.expiry_date.is_none() {
                            existing.expiry_date = *expiry_date;
                        }
                        existing.quantity
                    }
                    None => {
                        batches.push(BinItem {
                            bin_id,
                            item_id,
                            batch_number: batch_number.clone(),
                            expiry_date: *expiry_date,
                            quantity,
                        });
                        quantity
                    }
                }
            }
            StockChange::Issue { batch_number, .. } => {
                let code = &self.bins[i].code;
                let batches = &mut self.batches[i];
                let pos = batches
                    .iter()
                    .position(|b| b.is_batch(item_id, batch_number.as_deref()));
                let available = pos.map(|p| batches[p].quantity).unwrap_or(0);
                let pos = match pos {
                    Some(p) if available >= quantity => p,
                    _ => {
                        return Err(StockError::InsufficientStock {
                            bin: code.clone(),
                            requested: quantity,
                            available,
                        });
                    }
                };
                batches[pos].quantity -= quantity;
                let left = batches[pos].quantity;
                if left == 0 {
                    batches.remove(pos);
                }
                left
            }
        };

        let bin = &mut self.bins[i];
        match change {
            StockChange::Receive { .. } => bin.current_load += quantity,
            StockChange::Issue { .. } => bin.current_load -= quantity,
        }
        bin.version += 1;

        Ok(AppliedChange {
            bin_id,
            version: bin.version,
            current_load: bin.current_load,
            batch_quantity,
        })
    }

    /// Change a bin's operational status (blocking it for maintenance, etc.).
    pub fn set_bin_status(
        &mut self,
        bin_id: BinId,
        status: BinStatus,
    ) -> Result<u64, StockError> {
        let idx = self.bin_idx(bin_id).ok_or(StockError::BinNotFound(bin_id))?;
        let bin = &mut self.bins[idx.index()];
        if bin.status != status {
            bin.status = status;
            bin.version += 1;
        }
        Ok(bin.version)
    }
}

/// Incremental, validating constructor for a [`StorageTopology`].
///
/// Rows must be added parents first. Bin loads are derived from the batches
/// added, so the load/batch invariant holds by construction.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: StorageTopology,
    bin_codes: HashSet<String>,
}

impl TopologyBuilder {
    pub fn zone(&mut self, zone: Zone) -> ZoneIdx {
        let t = &mut self.topology;
        t.zones.push(zone);
        t.zone_bins.push(Vec::new());
        ZoneIdx((t.zones.len() - 1) as u32)
    }

    pub fn aisle(&mut self, aisle: Aisle) -> DomainResult<AisleIdx> {
        let t = &mut self.topology;
        if aisle.zone.index() >= t.zones.len() {
            return Err(DomainError::validation(format!(
                "aisle {} references unknown zone {:?}",
                aisle.code, aisle.zone
            )));
        }
        t.aisles.push(aisle);
        Ok(AisleIdx((t.aisles.len() - 1) as u32))
    }

    pub fn rack(&mut self, rack: Rack) -> DomainResult<RackIdx> {
        let t = &mut self.topology;
        if rack.aisle.index() >= t.aisles.len() {
            return Err(DomainError::validation(format!(
                "rack {} references unknown aisle {:?}",
                rack.code, rack.aisle
            )));
        }
        t.racks.push(rack);
        Ok(RackIdx((t.racks.len() - 1) as u32))
    }

    pub fn bin(&mut self, mut bin: Bin) -> DomainResult<BinIdx> {
        let t = &mut self.topology;
        let rack = t.racks.get(bin.rack.index()).ok_or_else(|| {
            DomainError::validation(format!(
                "bin {} references unknown rack {:?}",
                bin.code, bin.rack
            ))
        })?;
        if t.bin_index.contains_key(&bin.id) {
            return Err(DomainError::validation(format!("duplicate bin id {}", bin.id)));
        }
        if !self.bin_codes.insert(bin.code.clone()) {
            return Err(DomainError::validation(format!("duplicate bin code {}", bin.code)));
        }
        let zone = t.aisles[rack.aisle.index()].zone;
        let idx = BinIdx(t.bins.len() as u32);

        bin.current_load = 0;
        t.bin_index.insert(bin.id, idx);
        t.bins.push(bin);
        t.batches.push(Vec::new());
        t.bin_zone.push(zone);
        t.zone_bins[zone.index()].push(idx);
        Ok(idx)
    }

    pub fn item(&mut self, item: Item) -> DomainResult<()> {
        let t = &mut self.topology;
        if t.item_index.contains_key(&item.id) {
            return Err(DomainError::validation(format!("duplicate item id {}", item.id)));
        }
        t.item_index.insert(item.id, t.items.len());
        t.items.push(item);
        Ok(())
    }

    /// Add stored stock. Loads the owning bin by the batch quantity.
    pub fn batch(&mut self, batch: BinItem) -> DomainResult<()> {
        let t = &mut self.topology;
        let idx = t
            .bin_index
            .get(&batch.bin_id)
            .copied()
            .ok_or_else(|| DomainError::not_found(format!("bin {}", batch.bin_id)))?;
        if !t.item_index.contains_key(&batch.item_id) {
            return Err(DomainError::not_found(format!("item {}", batch.item_id)));
        }
        if batch.quantity == 0 {
            return Err(DomainError::validation("stored batch quantity must be positive"));
        }
        let i = idx.index();
        if t.batches[i]
            .iter()
            .any(|b| b.is_batch(batch.item_id, batch.batch_number.as_deref()))
        {
            return Err(DomainError::validation(format!(
                "duplicate batch for item {} in bin {}",
                batch.item_id, t.bins[i].code
            )));
        }
        let bin = &mut t.bins[i];
        if batch.quantity > bin.remaining_capacity() {
            return Err(DomainError::invariant(format!(
                "bin {} cannot hold {} more units (capacity {}, load {})",
                bin.code, batch.quantity, bin.capacity, bin.current_load
            )));
        }
        bin.current_load += batch.quantity;
        t.batches[i].push(batch);
        Ok(())
    }

    pub fn build(self) -> DomainResult<StorageTopology> {
        self.topology.check_invariants()?;
        Ok(self.topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use slotwise_core::TemperatureClass;

    struct Fixture {
        topology: StorageTopology,
        zone: ZoneIdx,
        bins: Vec<BinId>,
        item: ItemId,
    }

    fn fixture() -> Fixture {
        let mut b = StorageTopology::builder();
        let zone = b.zone(Zone::new("A", TemperatureClass::Ambient));
        let aisle = b
            .aisle(Aisle {
                zone,
                code: "A-01".into(),
                position: 0,
                width: 3.0,
            })
            .unwrap();
        let rack = b
            .rack(Rack {
                aisle,
                code: "R-01".into(),
                level: 1,
                row: 0,
                column: 0,
            })
            .unwrap();
        let bins: Vec<BinId> = (0..3)
            .map(|n| {
                let id = BinId::new();
                b.bin(Bin::new(id, format!("B-{n:02}"), rack, 100)).unwrap();
                id
            })
            .collect();
        let item = ItemId::new();
        b.item(Item::new(item, "SKU-1", "dry", TemperatureClass::Ambient).with_unit_weight(2.0))
            .unwrap();
        b.batch(BinItem::new(bins[0], item, 30).with_batch("LOT-1")).unwrap();

        Fixture {
            topology: b.build().unwrap(),
            zone,
            bins,
            item,
        }
    }

    fn receive(item: ItemId, batch: Option<&str>, quantity: u32) -> StockChange {
        StockChange::Receive {
            item_id: item,
            batch_number: batch.map(str::to_string),
            expiry_date: None,
            quantity,
        }
    }

    fn issue(item: ItemId, batch: Option<&str>, quantity: u32) -> StockChange {
        StockChange::Issue {
            item_id: item,
            batch_number: batch.map(str::to_string),
            quantity,
        }
    }

    #[test]
    fn builder_derives_load_from_batches() {
        let f = fixture();
        let idx = f.topology.bin_idx(f.bins[0]).unwrap();
        assert_eq!(f.topology.bin(idx).current_load(), 30);
        assert_eq!(f.topology.bin_weight(idx), 60.0);
        assert_eq!(f.topology.location_path(idx), "A/A-01/R-01/B-00");
        assert!((f.topology.zone_occupancy(f.zone) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn builder_rejects_dangling_parents_and_duplicates() {
        let mut b = StorageTopology::builder();
        assert!(
            b.aisle(Aisle {
                zone: ZoneIdx(4),
                code: "X".into(),
                position: 0,
                width: 2.0,
            })
            .is_err()
        );
        let zone = b.zone(Zone::new("A", TemperatureClass::Ambient));
        let aisle = b
            .aisle(Aisle {
                zone,
                code: "A-01".into(),
                position: 0,
                width: 2.0,
            })
            .unwrap();
        let rack = b
            .rack(Rack {
                aisle,
                code: "R".into(),
                level: 0,
                row: 0,
                column: 0,
            })
            .unwrap();
        b.bin(Bin::new(BinId::new(), "B-1", rack, 10)).unwrap();
        assert!(b.bin(Bin::new(BinId::new(), "B-1", rack, 10)).is_err());
    }

    #[test]
    fn builder_rejects_overfilled_bins() {
        let mut f_builder = StorageTopology::builder();
        let zone = f_builder.zone(Zone::new("A", TemperatureClass::Ambient));
        let aisle = f_builder
            .aisle(Aisle {
                zone,
                code: "A-01".into(),
                position: 0,
                width: 2.0,
            })
            .unwrap();
        let rack = f_builder
            .rack(Rack {
                aisle,
                code: "R".into(),
                level: 0,
                row: 0,
                column: 0,
            })
            .unwrap();
        let bin = BinId::new();
        let item = ItemId::new();
        f_builder.bin(Bin::new(bin, "B-1", rack, 10)).unwrap();
        f_builder
            .item(Item::new(item, "SKU", "dry", TemperatureClass::Ambient))
            .unwrap();
        let err = f_builder.batch(BinItem::new(bin, item, 11)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn receive_into_existing_batch_increments_it() {
        let mut f = fixture();
        let applied = f
            .topology
            .apply(f.bins[0], ExpectedVersion::Exact(0), &receive(f.item, Some("LOT-1"), 10))
            .unwrap();
        assert_eq!(applied.current_load, 40);
        assert_eq!(applied.batch_quantity, 40);
        assert_eq!(applied.version, 1);
        let idx = f.topology.bin_idx(f.bins[0]).unwrap();
        assert_eq!(f.topology.batches(idx).len(), 1);
        f.topology.check_invariants().unwrap();
    }

    #[test]
    fn receive_new_batch_creates_bin_item_with_expiry() {
        let mut f = fixture();
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let change = StockChange::Receive {
            item_id: f.item,
            batch_number: Some("LOT-2".into()),
            expiry_date: Some(expiry),
            quantity: 5,
        };
        f.topology.apply(f.bins[0], ExpectedVersion::Any, &change).unwrap();
        let idx = f.topology.bin_idx(f.bins[0]).unwrap();
        let batches = f.topology.batches(idx);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].expiry_date, Some(expiry));
        assert_eq!(f.topology.bin(idx).current_load(), 35);
    }

    #[test]
    fn stale_version_is_rejected_without_mutation() {
        let mut f = fixture();
        let err = f
            .topology
            .apply(f.bins[0], ExpectedVersion::Exact(7), &receive(f.item, None, 1))
            .unwrap_err();
        assert!(matches!(err, StockError::StaleVersion { actual: 0, .. }));
        let idx = f.topology.bin_idx(f.bins[0]).unwrap();
        assert_eq!(f.topology.bin(idx).current_load(), 30);
    }

    #[test]
    fn receive_beyond_capacity_is_rejected() {
        let mut f = fixture();
        let err = f
            .topology
            .apply(f.bins[0], ExpectedVersion::Any, &receive(f.item, None, 71))
            .unwrap_err();
        assert_eq!(
            err,
            StockError::InsufficientCapacity {
                bin: "B-00".into(),
                requested: 71,
                available: 70
            }
        );
        f.topology.check_invariants().unwrap();
    }

    #[test]
    fn issue_to_zero_deletes_the_batch() {
        let mut f = fixture();
        let applied = f
            .topology
            .apply(f.bins[0], ExpectedVersion::Any, &issue(f.item, Some("LOT-1"), 30))
            .unwrap();
        assert_eq!(applied.batch_quantity, 0);
        assert_eq!(applied.current_load, 0);
        let idx = f.topology.bin_idx(f.bins[0]).unwrap();
        assert!(f.topology.batches(idx).is_empty());
        f.topology.check_invariants().unwrap();
    }

    #[test]
    fn issue_more_than_stored_is_rejected() {
        let mut f = fixture();
        let err = f
            .topology
            .apply(f.bins[0], ExpectedVersion::Any, &issue(f.item, Some("LOT-1"), 31))
            .unwrap_err();
        assert!(matches!(
            err,
            StockError::InsufficientStock {
                requested: 31,
                available: 30,
                ..
            }
        ));
    }

    #[test]
    fn blocked_bins_refuse_changes() {
        let mut f = fixture();
        let v = f.topology.set_bin_status(f.bins[1], BinStatus::Blocked).unwrap();
        assert_eq!(v, 1);
        let err = f
            .topology
            .apply(f.bins[1], ExpectedVersion::Exact(1), &receive(f.item, None, 1))
            .unwrap_err();
        assert!(matches!(err, StockError::BinUnavailable { .. }));
    }

    #[test]
    fn holdings_list_every_batch_of_an_item() {
        let mut f = fixture();
        f.topology
            .apply(f.bins[2], ExpectedVersion::Any, &receive(f.item, Some("LOT-9"), 4))
            .unwrap();
        assert_eq!(f.topology.holdings(f.item).len(), 2);
        assert_eq!(f.topology.stock_of(f.item), 34);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 128,
                ..ProptestConfig::default()
            })]

            /// Property: whatever sequence of receives/issues is attempted,
            /// accepted or rejected, load always equals stored batches and
            /// never exceeds capacity.
            #[test]
            fn load_tracks_batches_under_random_changes(
                ops in prop::collection::vec((0usize..3, any::<bool>(), 1u32..60, 0usize..2), 1..60)
            ) {
                let mut f = fixture();
                let lots = ["LOT-1", "LOT-2"];
                for (bin, is_receive, qty, lot) in ops {
                    let change = if is_receive {
                        receive(f.item, Some(lots[lot]), qty)
                    } else {
                        issue(f.item, Some(lots[lot]), qty)
                    };
                    let _ = f.topology.apply(f.bins[bin], ExpectedVersion::Any, &change);
                    prop_assert!(f.topology.check_invariants().is_ok());
                }
            }
        }
    }
}
