//! Small builders shared by unit and end-to-end tests. Compiled behind the
//! `test-helpers` feature so downstream integration tests can use them too.

use std::sync::Arc;

use bevy_ecs::prelude::{Entity, World};

use crate::config::DispatchConfig;
use crate::ecs::{AtLink, FleetDirectory, Vehicle, VehicleId};
use crate::network::{LinkId, Network, NodeId};
use crate::registry::{Request, RequestId};
use crate::scenario;
use crate::schedule::Schedule;

/// One-way chain of `n_links` links, 100 m each at 10 m/s: link `i` runs
/// from node `i` to node `i + 1`, so each hop takes ten seconds.
pub fn line_network(n_links: u64) -> Network {
    let mut network = Network::new();
    for node in 0..=n_links {
        network.add_node(NodeId(node), node as f64 * 100.0, 0.0);
    }
    for link in 0..n_links {
        network.add_link(LinkId(link), NodeId(link), NodeId(link + 1), 100.0, 10.0);
    }
    network
}

/// Bidirectional square grid, 10 m/s links. See [`scenario::grid_network`].
pub fn grid_network(dim: u32, spacing_m: f64) -> Network {
    scenario::grid_network(dim, spacing_m, 10.0)
}

/// Empty world with every simulation resource installed for `network`.
pub fn create_test_world(network: Arc<Network>, config: DispatchConfig) -> World {
    let mut world = World::new();
    scenario::install_resources(&mut world, network, config);
    world
}

/// Spawns a vehicle with an empty schedule and registers it in the fleet
/// directory.
pub fn spawn_vehicle(world: &mut World, id: u64, at: LinkId, capacity: usize) -> Entity {
    let vehicle_id = VehicleId(id);
    let entity = world
        .spawn((
            Vehicle {
                id: vehicle_id,
                capacity,
            },
            AtLink(at),
            Schedule::default(),
        ))
        .id();
    world
        .resource_mut::<FleetDirectory>()
        .insert(vehicle_id, entity);
    entity
}

pub fn make_request(
    id: u64,
    submitted_ms: u64,
    origin: LinkId,
    destination: LinkId,
    max_wait_ms: u64,
) -> Request {
    Request::new(RequestId(id), submitted_ms, origin, destination, max_wait_ms)
}
