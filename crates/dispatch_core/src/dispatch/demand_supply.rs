use super::{GoalFunction, InsertionCandidate};
use crate::zones::ZoneBalance;

/// DEMAND_SUPPLY_EQUILIBRIUM: wait time plus a penalty proportional to the
/// imbalance (pending - idle) of the candidate vehicle's zone. Vehicles in
/// over-supplied zones carry a negative imbalance and win ties, pulling
/// supply toward under-supplied zones.
#[derive(Debug)]
pub struct DemandSupplyEquilibrium {
    weight_ms: f64,
}

impl DemandSupplyEquilibrium {
    pub fn new(weight_ms: f64) -> Self {
        Self { weight_ms }
    }
}

impl GoalFunction for DemandSupplyEquilibrium {
    fn cost(&self, candidate: &InsertionCandidate, balance: &ZoneBalance) -> f64 {
        let imbalance = candidate
            .vehicle_zone
            .map(|zone| balance.imbalance(zone))
            .unwrap_or(0);
        candidate.wait_ms as f64 + self.weight_ms * imbalance as f64
    }

    fn name(&self) -> &'static str {
        "DEMAND_SUPPLY_EQUILIBRIUM"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::ecs::VehicleId;
    use crate::network::LinkId;
    use crate::test_helpers::grid_network;
    use crate::zones::ZonalIndex;

    #[test]
    fn oversupplied_zone_beats_balanced_zone_at_equal_wait() {
        let mut index = ZonalIndex::new(Arc::new(grid_network(4, 100.0)), 100.0);
        // Three idle vehicles parked in one zone, none pending there.
        index.insert_idle_vehicle(VehicleId(1), LinkId(0));
        index.insert_idle_vehicle(VehicleId(2), LinkId(0));
        index.insert_idle_vehicle(VehicleId(3), LinkId(0));
        let oversupplied = index.zone_of(LinkId(0)).expect("zone");

        let mut balance = ZoneBalance::default();
        balance.refresh_from(&index);

        let goal = DemandSupplyEquilibrium::new(60_000.0);
        let from_surplus = InsertionCandidate {
            vehicle: VehicleId(1),
            vehicle_zone: Some(oversupplied),
            pickup_begin_ms: 30_000,
            wait_ms: 30_000,
        };
        let from_balanced = InsertionCandidate {
            vehicle: VehicleId(9),
            vehicle_zone: None,
            pickup_begin_ms: 30_000,
            wait_ms: 30_000,
        };

        assert!(goal.cost(&from_surplus, &balance) < goal.cost(&from_balanced, &balance));
    }
}
