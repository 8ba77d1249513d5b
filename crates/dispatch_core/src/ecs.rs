use std::collections::BTreeMap;
use std::fmt;

use bevy_ecs::prelude::{Component, Entity, Resource};

use crate::network::LinkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VehicleId(pub u64);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vehicle-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct Vehicle {
    pub id: VehicleId,
    /// Passenger seats; tail insertion rejects a request when the schedule
    /// would exceed this at the insertion point.
    pub capacity: usize,
}

/// Current link of a vehicle. Updated one hop at a time by the movement system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Component)]
pub struct AtLink(pub LinkId);

/// Marks a vehicle that lost its route and was pulled from service.
/// Out-of-service vehicles are never dispatch candidates and process no tasks.
#[derive(Debug, Clone, Copy, Component)]
pub struct OutOfService;

/// Maps vehicle ids to their ECS entities so event subjects can be resolved.
#[derive(Debug, Default, Resource)]
pub struct FleetDirectory {
    by_id: BTreeMap<VehicleId, Entity>,
}

impl FleetDirectory {
    pub fn insert(&mut self, id: VehicleId, entity: Entity) {
        self.by_id.insert(id, entity);
    }

    pub fn entity(&self, id: VehicleId) -> Option<Entity> {
        self.by_id.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
