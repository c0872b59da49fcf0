//! Engine configuration loading.
//!
//! Policies default to the reference constants. Deployments override them
//! either with a JSON document or with `SLOTWISE_*` environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SLOTWISE_WEIGHT_{UTILIZATION,COMPATIBILITY,ZONE_EFFICIENCY,ACCESSIBILITY,FIFO}` | `scoring.weights.*` |
//! | `SLOTWISE_COMPAT_{SAME_ITEM,EMPTY,SAME_CATEGORY,FEW_CATEGORIES,MIXED}` | `scoring.compatibility.*` |
//! | `SLOTWISE_FIFO_VIOLATION` | `scoring.fifo_violation` |
//! | `SLOTWISE_MAX_LEVELS` | `scoring.max_levels` |
//! | `SLOTWISE_REFERENCE_AISLE_WIDTH` | `scoring.reference_aisle_width` |
//! | `SLOTWISE_ROUTE_METRIC` | `routing.metric` (`euclidean` / `grid`) |
//! | `SLOTWISE_PRIORITY_TOLERANCE` | `routing.priority_tolerance` |
//! | `SLOTWISE_TRAVEL_SPEED` | `routing.travel_speed` |
//! | `SLOTWISE_SECONDS_PER_{STOP,UNIT,LEVEL}` | `routing.seconds_per_*` |
//! | `SLOTWISE_DEPOT` | `routing.depot` as `x,y` |
//! | `SLOTWISE_ALTERNATIVES` | `alternatives` |
//!
//! Unparsable values are logged and ignored; the assembled policies are then
//! validated as a whole.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use slotwise_core::DomainError;
use slotwise_picking::{DistanceMetric, Point, RoutingPolicy};
use slotwise_putaway::{PlacementScorer, PolicyError, ScoringPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid scoring policy: {0}")]
    Scoring(#[from] PolicyError),

    #[error("invalid routing policy: {0}")]
    Routing(#[from] DomainError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringPolicy,
    pub routing: RoutingPolicy,
    /// Runner-up bins carried by a placement result.
    pub alternatives: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringPolicy::default(),
            routing: RoutingPolicy::default(),
            alternatives: PlacementScorer::DEFAULT_ALTERNATIVES,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;
        self.routing.validate()?;
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `SLOTWISE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = EngineConfig::default();
        let env = Overrides { lookup: &lookup };

        let weights = &mut config.scoring.weights;
        env.apply("SLOTWISE_WEIGHT_UTILIZATION", &mut weights.utilization);
        env.apply("SLOTWISE_WEIGHT_COMPATIBILITY", &mut weights.compatibility);
        env.apply("SLOTWISE_WEIGHT_ZONE_EFFICIENCY", &mut weights.zone_efficiency);
        env.apply("SLOTWISE_WEIGHT_ACCESSIBILITY", &mut weights.accessibility);
        env.apply("SLOTWISE_WEIGHT_FIFO", &mut weights.fifo);

        let brackets = &mut config.scoring.compatibility;
        env.apply("SLOTWISE_COMPAT_SAME_ITEM", &mut brackets.same_item);
        env.apply("SLOTWISE_COMPAT_EMPTY", &mut brackets.empty);
        env.apply("SLOTWISE_COMPAT_SAME_CATEGORY", &mut brackets.same_category);
        env.apply("SLOTWISE_COMPAT_FEW_CATEGORIES", &mut brackets.few_categories);
        env.apply("SLOTWISE_COMPAT_MIXED", &mut brackets.mixed);

        env.apply("SLOTWISE_FIFO_VIOLATION", &mut config.scoring.fifo_violation);
        env.apply("SLOTWISE_MAX_LEVELS", &mut config.scoring.max_levels);
        env.apply(
            "SLOTWISE_REFERENCE_AISLE_WIDTH",
            &mut config.scoring.reference_aisle_width,
        );

        let routing = &mut config.routing;
        env.apply::<DistanceMetric>("SLOTWISE_ROUTE_METRIC", &mut routing.metric);
        env.apply("SLOTWISE_PRIORITY_TOLERANCE", &mut routing.priority_tolerance);
        env.apply("SLOTWISE_TRAVEL_SPEED", &mut routing.travel_speed);
        env.apply("SLOTWISE_SECONDS_PER_STOP", &mut routing.seconds_per_stop);
        env.apply("SLOTWISE_SECONDS_PER_UNIT", &mut routing.seconds_per_unit);
        env.apply("SLOTWISE_SECONDS_PER_LEVEL", &mut routing.seconds_per_level);
        if let Some(raw) = lookup("SLOTWISE_DEPOT") {
            match parse_point(&raw) {
                Some(depot) => routing.depot = depot,
                None => warn!(key = "SLOTWISE_DEPOT", value = %raw, "expected `x,y`; keeping default"),
            }
        }

        env.apply("SLOTWISE_ALTERNATIVES", &mut config.alternatives);

        config.validate()?;
        Ok(config)
    }
}

struct Overrides<'a, F> {
    lookup: &'a F,
}

impl<F> Overrides<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn apply<T>(&self, key: &str, target: &mut T)
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        let Some(raw) = (self.lookup)(key) else {
            return;
        };
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(err) => warn!(key, value = %raw, error = %err, "unparsable setting; keeping default"),
        }
    }
}

fn parse_point(raw: &str) -> Option<Point> {
    let (x, y) = raw.split_once(',')?;
    Some(Point::new(x.trim().parse().ok()?, y.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn no_variables_yield_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.alternatives, 5);
    }

    #[test]
    fn variables_override_policies() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("SLOTWISE_WEIGHT_UTILIZATION", "40"),
            ("SLOTWISE_WEIGHT_FIFO", "0"),
            ("SLOTWISE_ROUTE_METRIC", "grid"),
            ("SLOTWISE_DEPOT", "2.5, 4"),
            ("SLOTWISE_ALTERNATIVES", "2"),
        ]))
        .unwrap();

        assert_eq!(config.scoring.weights.utilization, 40.0);
        assert_eq!(config.scoring.weights.fifo, 0.0);
        assert_eq!(config.routing.metric, DistanceMetric::Grid);
        assert_eq!(config.routing.depot, Point::new(2.5, 4.0));
        assert_eq!(config.alternatives, 2);
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("SLOTWISE_TRAVEL_SPEED", "fast"),
            ("SLOTWISE_DEPOT", "nowhere"),
        ]))
        .unwrap();
        assert_eq!(config.routing.travel_speed, RoutingPolicy::DEFAULT_TRAVEL_SPEED);
        assert_eq!(config.routing.depot, Point::ORIGIN);
    }

    #[test]
    fn weights_must_still_sum_to_one_hundred() {
        let err = EngineConfig::from_lookup(lookup(&[("SLOTWISE_WEIGHT_UTILIZATION", "35")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Scoring(PolicyError::WeightSum(_))));
    }

    #[test]
    fn json_document_is_partial() {
        let config = EngineConfig::from_json_str(
            r#"{ "alternatives": 3, "routing": { "metric": "grid" } }"#,
        )
        .unwrap();
        assert_eq!(config.alternatives, 3);
        assert_eq!(config.routing.metric, DistanceMetric::Grid);
        assert_eq!(config.scoring, ScoringPolicy::default());

        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "routing": { "travel_speed": 0 } }"#),
            Err(ConfigError::Routing(_))
        ));
    }
}
