use bevy_ecs::prelude::Resource;
use serde::Deserialize;

use crate::clock::ONE_SEC_MS;

/// Which goal function the optimizer minimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalKind {
    MinWaitTime,
    DemandSupplyEquilibrium,
}

/// Dispatch tuning surface, consumed as data. Field names follow the config
/// file keys; times are seconds, distances metres.
#[derive(Debug, Clone, Deserialize, Resource)]
#[serde(default)]
pub struct DispatchConfig {
    pub goal: GoalKind,
    pub nearest_vehicles_limit: usize,
    pub nearest_requests_limit: usize,
    pub zone_cell_size_m: f64,
    pub expansion_distance_m: f64,
    pub pickup_duration_secs: f64,
    pub dropoff_duration_secs: f64,
    pub dispatch_interval_secs: f64,
    /// Cost added per unit of (pending - idle) in the candidate vehicle's
    /// zone under DEMAND_SUPPLY_EQUILIBRIUM, in milliseconds of wait.
    pub imbalance_weight_ms: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            goal: GoalKind::DemandSupplyEquilibrium,
            nearest_vehicles_limit: 20,
            nearest_requests_limit: 20,
            zone_cell_size_m: 1000.0,
            expansion_distance_m: 3000.0,
            pickup_duration_secs: 120.0,
            dropoff_duration_secs: 60.0,
            dispatch_interval_secs: 10.0,
            imbalance_weight_ms: 60_000.0,
        }
    }
}

impl DispatchConfig {
    pub fn pickup_duration_ms(&self) -> u64 {
        (self.pickup_duration_secs * ONE_SEC_MS as f64).round() as u64
    }

    pub fn dropoff_duration_ms(&self) -> u64 {
        (self.dropoff_duration_secs * ONE_SEC_MS as f64).round() as u64
    }

    pub fn dispatch_interval_ms(&self) -> u64 {
        (self.dispatch_interval_secs * ONE_SEC_MS as f64).round().max(1.0) as u64
    }
}
