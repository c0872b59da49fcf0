//! Zone → aisle → rack rows of the storage hierarchy.
//!
//! Rows reference their parent through integer handles into the topology's
//! arena tables instead of owning or pointing at each other.

use serde::{Deserialize, Serialize};

use slotwise_core::{HazardLevel, TemperatureClass};

macro_rules! arena_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_handle!(
    /// Row handle into the zone table.
    ZoneIdx
);
arena_handle!(
    /// Row handle into the aisle table.
    AisleIdx
);
arena_handle!(
    /// Row handle into the rack table.
    RackIdx
);
arena_handle!(
    /// Row handle into the bin table.
    BinIdx
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub code: String,
    pub temperature: TemperatureClass,
    /// Most hazardous class this zone may store.
    pub max_hazard: HazardLevel,
    /// Zone origin on the floor plan, metres.
    pub origin_x: f64,
    pub origin_y: f64,
}

impl Zone {
    pub fn new(code: impl Into<String>, temperature: TemperatureClass) -> Self {
        Self {
            code: code.into(),
            temperature,
            max_hazard: HazardLevel::None,
            origin_x: 0.0,
            origin_y: 0.0,
        }
    }

    pub fn with_max_hazard(mut self, max_hazard: HazardLevel) -> Self {
        self.max_hazard = max_hazard;
        self
    }

    pub fn with_origin(mut self, x: f64, y: f64) -> Self {
        self.origin_x = x;
        self.origin_y = y;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aisle {
    pub zone: ZoneIdx,
    pub code: String,
    /// Ordinal of the aisle across the zone (0 = closest to the zone origin).
    pub position: u32,
    /// Clear aisle width in metres.
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rack {
    pub aisle: AisleIdx,
    pub code: String,
    /// Shelf level, 0 = floor.
    pub level: u32,
    pub row: u32,
    /// Bay position along the aisle.
    pub column: u32,
}
