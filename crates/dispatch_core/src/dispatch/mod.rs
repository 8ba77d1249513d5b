pub mod demand_supply;
pub mod insertion;
pub mod min_wait;

use bevy_ecs::prelude::Resource;

pub use demand_supply::DemandSupplyEquilibrium;
pub use insertion::{commit_tail_insertion, evaluate_tail_insertion, InsertionCandidate};
pub use min_wait::MinWaitTime;

use crate::config::{DispatchConfig, GoalKind};
use crate::zones::ZoneBalance;

/// A goal function scores one feasible insertion; the optimizer commits the
/// candidate with the lowest cost (ties resolve by lowest vehicle id).
pub trait GoalFunction: Send + Sync {
    fn cost(&self, candidate: &InsertionCandidate, balance: &ZoneBalance) -> f64;
    fn name(&self) -> &'static str;
}

/// Resource wrapper for the goal function trait object, selected from
/// configuration at startup.
#[derive(Resource)]
pub struct GoalFunctionResource(pub Box<dyn GoalFunction>);

impl GoalFunctionResource {
    pub fn from_config(config: &DispatchConfig) -> Self {
        match config.goal {
            GoalKind::MinWaitTime => Self(Box::new(MinWaitTime)),
            GoalKind::DemandSupplyEquilibrium => Self(Box::new(DemandSupplyEquilibrium::new(
                config.imbalance_weight_ms,
            ))),
        }
    }
}

impl std::ops::Deref for GoalFunctionResource {
    type Target = dyn GoalFunction;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
