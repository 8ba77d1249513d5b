use super::{GoalFunction, InsertionCandidate};
use crate::zones::ZoneBalance;

/// MIN_WAIT_TIME: cost is the estimated wait until pickup, nothing else.
#[derive(Debug, Default)]
pub struct MinWaitTime;

impl GoalFunction for MinWaitTime {
    fn cost(&self, candidate: &InsertionCandidate, _balance: &ZoneBalance) -> f64 {
        candidate.wait_ms as f64
    }

    fn name(&self) -> &'static str {
        "MIN_WAIT_TIME"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::VehicleId;

    #[test]
    fn cost_is_wait_time() {
        let goal = MinWaitTime;
        let candidate = InsertionCandidate {
            vehicle: VehicleId(1),
            vehicle_zone: None,
            pickup_begin_ms: 30_000,
            wait_ms: 30_000,
        };
        assert_eq!(goal.cost(&candidate, &ZoneBalance::default()), 30_000.0);
    }
}
