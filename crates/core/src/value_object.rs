//! Value objects: equality by value, not identity.
//!
//! Value objects have **no identity**: two temperature classes with the same
//! variant are the same thing. They are immutable and cheap to copy.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects.
///
/// The trait requires:
/// - **Clone**: value objects are values, not references
/// - **PartialEq**: compared by their attribute values
/// - **Debug**: needed for logging and tests
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Storage temperature class of a zone (and the class an item requires).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemperatureClass {
    Ambient,
    Chilled,
    Frozen,
}

/// Hazard classification, ordered from harmless to most restricted.
///
/// A zone accepts every item whose hazard level is at most the zone's limit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HazardLevel {
    None,
    Low,
    Medium,
    High,
}

/// Request priority. Ordered so that `Urgent` is the greatest.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// URGENT and HIGH lines are sequenced ahead of the rest when the route allows it.
    pub fn is_expedited(self) -> bool {
        matches!(self, Priority::High | Priority::Urgent)
    }
}

impl ValueObject for TemperatureClass {}
impl ValueObject for HazardLevel {}
impl ValueObject for Priority {}

macro_rules! impl_label {
    ($t:ty, $name:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($label => Ok(Self::$variant),)+
                    other => Err(DomainError::validation(format!(
                        "unknown {}: {other}",
                        $name
                    ))),
                }
            }
        }
    };
}

impl_label!(TemperatureClass, "temperature class", {
    Ambient => "AMBIENT",
    Chilled => "CHILLED",
    Frozen => "FROZEN",
});

impl_label!(HazardLevel, "hazard level", {
    None => "NONE",
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
});

impl_label!(Priority, "priority", {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Urgent => "URGENT",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_urgent_highest() {
        let mut ps = vec![Priority::Medium, Priority::Urgent, Priority::Low, Priority::High];
        ps.sort_by(|a, b| b.cmp(a));
        assert_eq!(
            ps,
            vec![Priority::Urgent, Priority::High, Priority::Medium, Priority::Low]
        );
        assert!(Priority::High.is_expedited());
        assert!(!Priority::Medium.is_expedited());
    }

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!("frozen".parse::<TemperatureClass>().unwrap(), TemperatureClass::Frozen);
        assert_eq!(" High ".parse::<HazardLevel>().unwrap(), HazardLevel::High);
        assert!("LUKEWARM".parse::<TemperatureClass>().is_err());
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&TemperatureClass::Ambient).unwrap();
        assert_eq!(json, "\"AMBIENT\"");
        let p: Priority = serde_json::from_str("\"URGENT\"").unwrap();
        assert_eq!(p, Priority::Urgent);
    }
}
