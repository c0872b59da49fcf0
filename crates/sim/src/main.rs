//! Demo run: seed a small two-zone warehouse, put away a few inbound lots,
//! then plan and commit a pick list. Results are printed as JSON.

use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use serde_json::json;

use slotwise_core::{BinId, ItemId, Priority, SystemClock, TemperatureClass, UserId};
use slotwise_events::InMemoryEventBus;
use slotwise_infra::{DefaultBus, EngineConfig, InMemoryInventoryStore, SlottingEngine};
use slotwise_inventory::{Aisle, Bin, BinItem, Item, Rack, StorageTopology, Zone};
use slotwise_picking::{PickLine, PickingConstraints, PickingRequest};
use slotwise_putaway::{Placement, PutawayRequest};

struct Catalog {
    water: ItemId,
    soap: ItemId,
    yoghurt: ItemId,
}

fn seed() -> anyhow::Result<(StorageTopology, Catalog)> {
    let mut b = StorageTopology::builder();
    let ambient = b.zone(Zone::new("AMB", TemperatureClass::Ambient));
    let chilled = b.zone(Zone::new("CHL", TemperatureClass::Chilled).with_origin(40.0, 0.0));

    let catalog = Catalog {
        water: ItemId::new(),
        soap: ItemId::new(),
        yoghurt: ItemId::new(),
    };
    b.item(
        Item::new(catalog.water, "WATER-6PK", "beverage", TemperatureClass::Ambient)
            .with_unit_weight(9.0)
            .with_unit_volume(0.012),
    )?;
    b.item(
        Item::new(catalog.soap, "SOAP-BAR", "household", TemperatureClass::Ambient)
            .with_unit_weight(0.1),
    )?;
    b.item(
        Item::new(catalog.yoghurt, "YOG-500", "dairy", TemperatureClass::Chilled)
            .with_unit_weight(0.5),
    )?;

    let mut first_bin = None;
    for (zone, zone_code) in [(ambient, "AMB"), (chilled, "CHL")] {
        for a in 0..2u32 {
            let aisle = b.aisle(Aisle {
                zone,
                code: format!("{zone_code}-A{a}"),
                position: a,
                width: if a == 0 { 3.0 } else { 2.2 },
            })?;
            for column in 0..4u32 {
                for level in 0..3u32 {
                    let rack = b.rack(Rack {
                        aisle,
                        code: format!("R{column}L{level}"),
                        level,
                        row: 0,
                        column,
                    })?;
                    let id = BinId::new();
                    let code = format!("{zone_code}-{a}-{column}-{level}");
                    b.bin(Bin::new(id, code, rack, 120).with_weight_limit(800.0))?;
                    first_bin.get_or_insert(id);
                }
            }
        }
    }

    // Older water lot already on hand so picking has a FIFO choice.
    let bin = first_bin.context("seeded warehouse has no bins")?;
    b.batch(
        BinItem::new(bin, catalog.water, 30)
            .with_batch("W-2024-01")
            .with_expiry(date(2025, 2, 1)?),
    )?;

    Ok((b.build()?, catalog))
}

fn date(y: i32, m: u32, d: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d).with_context(|| format!("invalid date {y}-{m}-{d}"))
}

fn main() -> anyhow::Result<()> {
    slotwise_observability::init();

    let config = EngineConfig::from_env().context("loading engine configuration")?;
    let (topology, catalog) = seed()?;
    let store = InMemoryInventoryStore::new(topology);
    let bus: DefaultBus = Arc::new(InMemoryEventBus::with_replay(256));
    let engine = SlottingEngine::new(store, SystemClock, &config).with_bus(bus.clone());
    let operator = UserId::new();

    let inbound = [
        PutawayRequest::new(catalog.water, 40)
            .with_batch("W-2024-06")
            .with_expiry(date(2025, 8, 1)?),
        PutawayRequest::new(catalog.soap, 200).with_priority(Priority::Low),
        PutawayRequest::new(catalog.soap, 60),
        PutawayRequest::new(catalog.yoghurt, 24)
            .with_batch("Y-17")
            .with_expiry(date(2024, 11, 20)?)
            .with_priority(Priority::Urgent),
    ];

    let mut putaways = Vec::new();
    for request in &inbound {
        match engine.find_placement(request)? {
            Placement::Found(result) => {
                let movement = engine.commit_placement(&result, result.bin_id(), operator)?;
                putaways.push(json!({
                    "bin": result.chosen.bin_code,
                    "location": result.location_path(),
                    "score": result.score(),
                    "breakdown": result.chosen.breakdown,
                    "movement": movement,
                }));
            }
            Placement::NoSuitableLocation(none) => {
                putaways.push(json!({ "no_suitable_location": none.message() }));
            }
        }
    }

    let picks = PickingRequest::new(vec![
        PickLine::new(catalog.water, 50, Priority::Medium),
        PickLine::new(catalog.yoghurt, 6, Priority::Urgent),
        PickLine::new(catalog.soap, 10, Priority::Low),
    ])
    .with_constraints(PickingConstraints {
        max_weight: Some(300.0),
        ..PickingConstraints::default()
    });
    let plan = engine.plan_picking_route(&picks)?;
    let picked = engine.commit_picking_route(&plan.routes, operator)?;

    // Read the whole run back from the bus, in ledger order.
    let replay = bus
        .subscribe_from(0)
        .map_err(|err| anyhow::anyhow!("movement bus unavailable: {err:?}"))?;
    let published: Vec<String> = std::iter::from_fn(|| replay.try_recv().ok())
        .map(|envelope| format!("#{} {}", envelope.sequence_number(), envelope.event_type()))
        .collect();
    tracing::info!(
        routes = plan.routes.len(),
        unsatisfied = plan.unsatisfied_lines.len(),
        published = published.len(),
        "demo run finished"
    );
    let report = json!({
        "putaways": putaways,
        "plan": plan,
        "picked": picked,
        "ledger_entries": engine.movements()?.len(),
        "published_events": published,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
