use serde::{Deserialize, Serialize};

use slotwise_core::{Entity, HazardLevel, ItemId, TemperatureClass};

/// Item reference data consumed by scoring and filtering.
///
/// Immutable from the engine's point of view; the catalog is owned elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub sku: String,
    pub category: String,
    pub hazard_level: HazardLevel,
    pub required_temperature: TemperatureClass,
    /// Weight of one unit in kilograms.
    pub unit_weight: f64,
    /// Volume of one unit in litres, when known.
    #[serde(default)]
    pub unit_volume: Option<f64>,
}

impl Item {
    pub fn new(
        id: ItemId,
        sku: impl Into<String>,
        category: impl Into<String>,
        required_temperature: TemperatureClass,
    ) -> Self {
        Self {
            id,
            sku: sku.into(),
            category: category.into(),
            hazard_level: HazardLevel::None,
            required_temperature,
            unit_weight: 0.0,
            unit_volume: None,
        }
    }

    pub fn with_hazard_level(mut self, hazard_level: HazardLevel) -> Self {
        self.hazard_level = hazard_level;
        self
    }

    pub fn with_unit_weight(mut self, unit_weight: f64) -> Self {
        self.unit_weight = unit_weight;
        self
    }

    pub fn with_unit_volume(mut self, unit_volume: f64) -> Self {
        self.unit_volume = Some(unit_volume);
        self
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
