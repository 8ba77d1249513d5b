//! Scenario construction: builds the network, fleet, and demand stream and
//! installs every resource the simulation schedule needs.

use std::collections::VecDeque;
use std::sync::Arc;

use bevy_ecs::prelude::{Resource, World};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::clock::{EventKind, SimulationClock, ONE_SEC_MS};
use crate::config::DispatchConfig;
use crate::dispatch::GoalFunctionResource;
use crate::ecs::{AtLink, FleetDirectory, Vehicle, VehicleId};
use crate::network::{
    BeelineEstimator, LinkId, Network, NetworkResource, NodeId, RouteOracleResource,
    ShortestPathOracle, TravelEstimatorResource,
};
use crate::registry::{Request, RequestId, RequestRegistry};
use crate::schedule::Schedule;
use crate::telemetry::DispatchTelemetry;
use crate::zones::{ZonalIndex, ZoneBalance};

/// Estimator speed used when a scenario does not override it.
pub const DEFAULT_ESTIMATOR_SPEED_M_S: f64 = 8.0;

/// Requests that have not been submitted yet, ascending by submission time.
#[derive(Debug, Default, Resource)]
pub struct PendingRequests(pub VecDeque<Request>);

#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub num_vehicles: u64,
    pub num_requests: u64,
    /// Seed for vehicle placement and demand sampling. Equal seeds give
    /// byte-identical runs.
    pub seed: u64,
    pub grid_dim: u32,
    pub node_spacing_m: f64,
    pub link_freespeed_m_s: f64,
    pub estimator_speed_m_s: f64,
    /// Requests are submitted uniformly within this window from time zero.
    pub submission_window_secs: u64,
    pub max_wait_secs: u64,
    pub vehicle_capacity: usize,
    pub config: DispatchConfig,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            num_vehicles: 20,
            num_requests: 100,
            seed: 42,
            grid_dim: 10,
            node_spacing_m: 200.0,
            link_freespeed_m_s: 10.0,
            estimator_speed_m_s: 8.0,
            submission_window_secs: 3600,
            max_wait_secs: 600,
            vehicle_capacity: 4,
            config: DispatchConfig::default(),
        }
    }
}

/// Square grid of `dim` x `dim` nodes with a pair of directed links between
/// every adjacent node pair. Link ids are assigned in row-major build order.
pub fn grid_network(dim: u32, spacing_m: f64, freespeed_m_s: f64) -> Network {
    let mut network = Network::new();
    let node_id = |row: u32, col: u32| NodeId(u64::from(row * dim + col));
    for row in 0..dim {
        for col in 0..dim {
            network.add_node(
                node_id(row, col),
                f64::from(col) * spacing_m,
                f64::from(row) * spacing_m,
            );
        }
    }
    let mut next_link = 0u64;
    let mut connect = |network: &mut Network, a: NodeId, b: NodeId| {
        network.add_link(LinkId(next_link), a, b, spacing_m, freespeed_m_s);
        next_link += 1;
        network.add_link(LinkId(next_link), b, a, spacing_m, freespeed_m_s);
        next_link += 1;
    };
    for row in 0..dim {
        for col in 0..dim {
            if col + 1 < dim {
                connect(&mut network, node_id(row, col), node_id(row, col + 1));
            }
            if row + 1 < dim {
                connect(&mut network, node_id(row, col), node_id(row + 1, col));
            }
        }
    }
    network
}

/// Installs the shared resources every simulation needs on an empty world.
pub fn install_resources(world: &mut World, network: Arc<Network>, config: DispatchConfig) {
    world.insert_resource(SimulationClock::default());
    world.insert_resource(GoalFunctionResource::from_config(&config));
    world.insert_resource(ZonalIndex::new(Arc::clone(&network), config.zone_cell_size_m));
    world.insert_resource(ZoneBalance::default());
    world.insert_resource(TravelEstimatorResource(Box::new(BeelineEstimator::new(
        Arc::clone(&network),
        DEFAULT_ESTIMATOR_SPEED_M_S,
    ))));
    world.insert_resource(RouteOracleResource(Box::new(ShortestPathOracle::new(
        Arc::clone(&network),
    ))));
    world.insert_resource(NetworkResource(network));
    world.insert_resource(config);
    world.insert_resource(RequestRegistry::default());
    world.insert_resource(FleetDirectory::default());
    world.insert_resource(DispatchTelemetry::default());
    world.insert_resource(PendingRequests::default());
}

/// Builds a complete randomized scenario: grid network, fleet spawned on
/// random links, and a demand stream scheduled over the submission window.
pub fn build_scenario(world: &mut World, params: &ScenarioParams) {
    let network = Arc::new(grid_network(
        params.grid_dim,
        params.node_spacing_m,
        params.link_freespeed_m_s,
    ));
    let link_ids: Vec<LinkId> = network.links().map(|link| link.id).collect();

    install_resources(world, Arc::clone(&network), params.config.clone());
    world.insert_resource(TravelEstimatorResource(Box::new(BeelineEstimator::new(
        network,
        params.estimator_speed_m_s,
    ))));

    let mut rng = StdRng::seed_from_u64(params.seed);

    for index in 0..params.num_vehicles {
        let id = VehicleId(index);
        let at = link_ids[rng.gen_range(0..link_ids.len())];
        let entity = world
            .spawn((
                Vehicle {
                    id,
                    capacity: params.vehicle_capacity,
                },
                AtLink(at),
                Schedule::default(),
            ))
            .id();
        world.resource_mut::<FleetDirectory>().insert(id, entity);
    }

    let mut requests: Vec<Request> = (0..params.num_requests)
        .map(|index| {
            let submitted_ms =
                rng.gen_range(0..=params.submission_window_secs) * ONE_SEC_MS;
            let origin = link_ids[rng.gen_range(0..link_ids.len())];
            let mut destination = link_ids[rng.gen_range(0..link_ids.len())];
            while destination == origin && link_ids.len() > 1 {
                destination = link_ids[rng.gen_range(0..link_ids.len())];
            }
            Request::new(
                RequestId(index),
                submitted_ms,
                origin,
                destination,
                params.max_wait_secs * ONE_SEC_MS,
            )
        })
        .collect();
    requests.sort_by_key(|request| (request.submitted_ms, request.id));

    {
        let mut clock = world.resource_mut::<SimulationClock>();
        clock.schedule_at(0, EventKind::SimulationStarted, None);
        for request in &requests {
            clock.schedule_at(request.submitted_ms, EventKind::RequestSubmitted, None);
        }
    }
    world.insert_resource(PendingRequests(requests.into()));

    info!(
        vehicles = params.num_vehicles,
        requests = params.num_requests,
        seed = params.seed,
        "scenario built"
    );
}
