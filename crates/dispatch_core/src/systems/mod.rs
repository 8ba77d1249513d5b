pub mod dispatch;
pub mod movement;
pub mod rendezvous;
pub mod request_submitted;
pub mod simulation_started;
pub mod task_advance;
pub mod zone_index;

#[cfg(test)]
mod end_to_end_tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use bevy_ecs::prelude::World;

    use crate::clock::{Event, EventKind, SimulationClock};
    use crate::config::{DispatchConfig, GoalKind};
    use crate::ecs::{OutOfService, VehicleId};
    use crate::network::{LinkId, Network, NodeId};
    use crate::registry::{AbortReason, RequestId, RequestRegistry, RequestStatus};
    use crate::runner::{run_until, run_until_empty, simulation_schedule};
    use crate::scenario::{build_scenario, PendingRequests, ScenarioParams};
    use crate::schedule::Schedule;
    use crate::telemetry::DispatchTelemetry;
    use crate::test_helpers::{create_test_world, grid_network, line_network, make_request,
        spawn_vehicle};

    /// Safety cap for the event loop; a correct run drains well below it.
    const MAX_STEPS: u64 = 100_000;

    fn seed_demand(world: &mut World, requests: Vec<crate::registry::Request>) {
        {
            let mut clock = world.resource_mut::<SimulationClock>();
            clock.schedule_at(0, EventKind::SimulationStarted, None);
            for request in &requests {
                clock.schedule_at(request.submitted_ms, EventKind::RequestSubmitted, None);
            }
        }
        world.insert_resource(PendingRequests(VecDeque::from(requests)));
    }

    fn link_at(network: &Network, x: f64, y: f64) -> LinkId {
        network
            .links()
            .find(|link| network.link_coord(link.id) == Some((x, y)))
            .expect("link at coordinate")
            .id
    }

    #[test]
    fn single_request_rides_to_completion() {
        let network = Arc::new(line_network(4));
        let mut world = create_test_world(Arc::clone(&network), DispatchConfig::default());
        let entity = spawn_vehicle(&mut world, 0, LinkId(0), 4);
        seed_demand(
            &mut world,
            vec![make_request(1, 1000, LinkId(1), LinkId(3), 600_000)],
        );

        let mut schedule = simulation_schedule();
        run_until_empty(&mut world, &mut schedule, MAX_STEPS);

        let registry = world.resource::<RequestRegistry>();
        let record = registry.archived_record(RequestId(1)).expect("archived");
        assert_eq!(record.status, RequestStatus::Completed);
        assert_eq!(record.assigned_vehicle, Some(VehicleId(0)));

        let telemetry = world.resource::<DispatchTelemetry>();
        assert_eq!(
            telemetry.request_history(RequestId(1)),
            vec![
                RequestStatus::Unplanned,
                RequestStatus::Planned,
                RequestStatus::PickedUp,
                RequestStatus::Completed,
            ]
        );

        // Stay, approach, pickup, haul, dropoff, back to stay.
        let vehicle_schedule = world.get::<Schedule>(entity).expect("schedule");
        let labels: Vec<&str> = vehicle_schedule
            .tasks()
            .iter()
            .map(|t| t.kind.label())
            .collect();
        assert_eq!(labels, vec!["stay", "drive", "pickup", "drive", "dropoff", "stay"]);
        assert!(vehicle_schedule.is_idle());
    }

    #[test]
    fn request_without_any_vehicle_aborts_at_deadline() {
        let network = Arc::new(line_network(4));
        let mut world = create_test_world(network, DispatchConfig::default());
        seed_demand(
            &mut world,
            vec![make_request(1, 0, LinkId(1), LinkId(3), 30_000)],
        );

        let mut schedule = simulation_schedule();
        run_until_empty(&mut world, &mut schedule, MAX_STEPS);

        let registry = world.resource::<RequestRegistry>();
        assert_eq!(registry.active_count(), 0);
        let record = registry.archived_record(RequestId(1)).expect("archived");
        assert_eq!(record.status, RequestStatus::Aborted);
        assert_eq!(record.abort_reason, Some(AbortReason::NoVehicleAvailable));
        assert_eq!(
            world
                .resource::<DispatchTelemetry>()
                .request_history(RequestId(1)),
            vec![RequestStatus::Unplanned, RequestStatus::Aborted]
        );
    }

    /// Two vehicles tie on wait time; the equilibrium goal prefers the one
    /// in the oversupplied zone, the wait-time goal falls back to lowest id.
    fn equidistant_world(goal: GoalKind) -> World {
        let config = DispatchConfig {
            goal,
            zone_cell_size_m: 100.0,
            ..DispatchConfig::default()
        };
        let network = Arc::new(grid_network(4, 100.0));
        let mut world = create_test_world(Arc::clone(&network), config);

        let origin = link_at(&network, 100.0, 100.0);
        let lone = link_at(&network, 100.0, 300.0);
        let crowded = link_at(&network, 300.0, 100.0);
        spawn_vehicle(&mut world, 1, lone, 4);
        spawn_vehicle(&mut world, 2, crowded, 4);
        spawn_vehicle(&mut world, 3, crowded, 4);

        let destination = link_at(&network, 0.0, 0.0);
        seed_demand(
            &mut world,
            vec![make_request(1, 1000, origin, destination, 600_000)],
        );
        world
    }

    #[test]
    fn equilibrium_goal_draws_from_the_oversupplied_zone() {
        let mut world = equidistant_world(GoalKind::DemandSupplyEquilibrium);
        let mut schedule = simulation_schedule();
        run_until_empty(&mut world, &mut schedule, MAX_STEPS);

        let record = world
            .resource::<RequestRegistry>()
            .archived_record(RequestId(1))
            .expect("archived");
        assert_eq!(record.status, RequestStatus::Completed);
        assert_eq!(record.assigned_vehicle, Some(VehicleId(2)));
    }

    #[test]
    fn wait_time_goal_breaks_ties_by_lowest_vehicle_id() {
        let mut world = equidistant_world(GoalKind::MinWaitTime);
        let mut schedule = simulation_schedule();
        run_until_empty(&mut world, &mut schedule, MAX_STEPS);

        let record = world
            .resource::<RequestRegistry>()
            .archived_record(RequestId(1))
            .expect("archived");
        assert_eq!(record.assigned_vehicle, Some(VehicleId(1)));
    }

    #[test]
    fn lost_route_pulls_vehicle_from_service_and_aborts_its_requests() {
        // Reachable by beeline estimate but not by any link path.
        let mut network = Network::new();
        network.add_node(NodeId(0), 0.0, 0.0);
        network.add_node(NodeId(1), 100.0, 0.0);
        network.add_link(LinkId(0), NodeId(0), NodeId(1), 100.0, 10.0);
        network.add_node(NodeId(10), 1000.0, 0.0);
        network.add_node(NodeId(11), 1100.0, 0.0);
        network.add_link(LinkId(5), NodeId(10), NodeId(11), 100.0, 10.0);
        let network = Arc::new(network);

        let mut world = create_test_world(Arc::clone(&network), DispatchConfig::default());
        let entity = spawn_vehicle(&mut world, 0, LinkId(0), 4);
        seed_demand(
            &mut world,
            vec![make_request(1, 0, LinkId(5), LinkId(5), 600_000)],
        );

        let mut schedule = simulation_schedule();
        run_until_empty(&mut world, &mut schedule, MAX_STEPS);

        assert!(world.get::<OutOfService>(entity).is_some());
        assert_eq!(world.resource::<DispatchTelemetry>().vehicles_lost.len(), 1);
        let record = world
            .resource::<RequestRegistry>()
            .archived_record(RequestId(1))
            .expect("archived");
        assert_eq!(record.status, RequestStatus::Aborted);
        assert_eq!(record.abort_reason, Some(AbortReason::VehicleOutOfService));
    }

    #[test]
    fn on_board_request_settles_when_its_vehicle_loses_the_route() {
        // One-way line: the approach to the origin is routable, the haul
        // back toward link 1 is not, so the route is lost after boarding.
        let network = Arc::new(line_network(3));
        let mut world = create_test_world(Arc::clone(&network), DispatchConfig::default());
        let entity = spawn_vehicle(&mut world, 0, LinkId(0), 4);
        seed_demand(
            &mut world,
            vec![make_request(1, 0, LinkId(2), LinkId(1), 600_000)],
        );

        let mut schedule = simulation_schedule();
        let steps = run_until_empty(&mut world, &mut schedule, MAX_STEPS);
        assert!(steps < MAX_STEPS, "event queue must drain after route loss");

        assert!(world.get::<OutOfService>(entity).is_some());
        let registry = world.resource::<RequestRegistry>();
        assert_eq!(registry.active_count(), 0);
        let record = registry.archived_record(RequestId(1)).expect("archived");
        assert_eq!(record.status, RequestStatus::Aborted);
        assert_eq!(record.abort_reason, Some(AbortReason::VehicleOutOfService));
        assert_eq!(
            world
                .resource::<DispatchTelemetry>()
                .request_history(RequestId(1))
                .last(),
            Some(&RequestStatus::Aborted)
        );
    }

    #[test]
    fn cancelled_request_sheds_its_serve_tasks_and_frees_the_vehicle() {
        let network = Arc::new(line_network(4));
        let mut world = create_test_world(Arc::clone(&network), DispatchConfig::default());
        let entity = spawn_vehicle(&mut world, 0, LinkId(0), 4);
        seed_demand(
            &mut world,
            vec![make_request(1, 0, LinkId(2), LinkId(3), 600_000)],
        );

        let mut schedule = simulation_schedule();
        // Let the vehicle start its approach, then cancel the planned request.
        run_until(&mut world, &mut schedule, 5_000);
        {
            let mut registry = world.resource_mut::<RequestRegistry>();
            assert_eq!(
                registry.get(RequestId(1)).map(|r| r.status),
                Some(RequestStatus::Planned)
            );
            registry
                .abort(RequestId(1), AbortReason::Cancelled)
                .expect("planned request aborts");
        }
        let steps = run_until_empty(&mut world, &mut schedule, MAX_STEPS);
        assert!(steps < MAX_STEPS);

        // The pickup degenerates to a no-op, the orphaned haul and dropoff
        // are shed, and the vehicle parks idle again.
        let vehicle_schedule = world.get::<Schedule>(entity).expect("schedule");
        assert!(vehicle_schedule.is_idle());
        let labels: Vec<&str> = vehicle_schedule
            .tasks()
            .iter()
            .map(|t| t.kind.label())
            .collect();
        assert_eq!(labels, vec!["stay", "drive", "pickup", "stay"]);
        assert_eq!(
            world
                .resource::<RequestRegistry>()
                .archived_record(RequestId(1))
                .map(|r| r.abort_reason),
            Some(Some(AbortReason::Cancelled))
        );
    }

    #[test]
    fn equal_seeds_replay_identical_request_outcomes() {
        let params = ScenarioParams {
            num_vehicles: 8,
            num_requests: 30,
            seed: 7,
            grid_dim: 6,
            submission_window_secs: 600,
            ..ScenarioParams::default()
        };

        let outcomes = |params: &ScenarioParams| {
            let mut world = World::new();
            build_scenario(&mut world, params);
            let mut schedule = simulation_schedule();
            run_until_empty(&mut world, &mut schedule, MAX_STEPS);
            world
                .resource::<DispatchTelemetry>()
                .request_transitions
                .iter()
                .map(|t| (t.request, t.status, t.time_ms))
                .collect::<Vec<_>>()
        };

        let first = outcomes(&params);
        let second = outcomes(&params);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn dispatch_pass_without_unplanned_requests_changes_nothing() {
        let network = Arc::new(line_network(4));
        let mut world = create_test_world(Arc::clone(&network), DispatchConfig::default());
        let entity = spawn_vehicle(&mut world, 0, LinkId(0), 4);
        seed_demand(
            &mut world,
            vec![make_request(1, 1000, LinkId(1), LinkId(3), 600_000)],
        );

        let mut schedule = simulation_schedule();
        run_until_empty(&mut world, &mut schedule, MAX_STEPS);
        let settled: Vec<_> = world
            .get::<Schedule>(entity)
            .expect("schedule")
            .tasks()
            .iter()
            .map(|t| (t.begin_ms, t.end_ms, t.status))
            .collect();

        let now = world.resource::<SimulationClock>().now();
        world.insert_resource(crate::clock::CurrentEvent(Event {
            timestamp: now,
            kind: EventKind::DispatchRun,
            subject: None,
        }));
        schedule.run(&mut world);

        let after: Vec<_> = world
            .get::<Schedule>(entity)
            .expect("schedule")
            .tasks()
            .iter()
            .map(|t| (t.begin_ms, t.end_ms, t.status))
            .collect();
        assert_eq!(settled, after);
        assert!(world.resource::<SimulationClock>().is_empty());
    }

    #[test]
    fn starved_request_aborts_when_its_deadline_passes() {
        let config = DispatchConfig {
            nearest_vehicles_limit: 1,
            ..DispatchConfig::default()
        };
        let network = Arc::new(line_network(6));
        let mut world = create_test_world(Arc::clone(&network), config);
        spawn_vehicle(&mut world, 0, LinkId(0), 4);
        seed_demand(
            &mut world,
            vec![
                make_request(1, 0, LinkId(1), LinkId(5), 3_600_000),
                make_request(2, 0, LinkId(1), LinkId(2), 30_000),
            ],
        );

        let mut schedule = simulation_schedule();
        run_until_empty(&mut world, &mut schedule, MAX_STEPS);

        let registry = world.resource::<RequestRegistry>();
        assert_eq!(
            registry.archived_record(RequestId(1)).map(|r| r.status),
            Some(RequestStatus::Completed)
        );
        let starved = registry.archived_record(RequestId(2)).expect("archived");
        assert_eq!(starved.status, RequestStatus::Aborted);
        assert_eq!(starved.abort_reason, Some(AbortReason::NoVehicleAvailable));
    }

    #[test]
    fn busy_fleet_serves_requests_in_sequence() {
        let network = Arc::new(line_network(6));
        let mut world = create_test_world(Arc::clone(&network), DispatchConfig::default());
        spawn_vehicle(&mut world, 0, LinkId(0), 4);
        seed_demand(
            &mut world,
            vec![
                make_request(1, 0, LinkId(1), LinkId(2), 3_600_000),
                make_request(2, 5_000, LinkId(3), LinkId(5), 3_600_000),
            ],
        );

        let mut schedule = simulation_schedule();
        run_until_empty(&mut world, &mut schedule, MAX_STEPS);

        let registry = world.resource::<RequestRegistry>();
        for id in [RequestId(1), RequestId(2)] {
            let record = registry.archived_record(id).expect("archived");
            assert_eq!(record.status, RequestStatus::Completed, "{id}");
        }
        assert_eq!(world.resource::<DispatchTelemetry>().completed_requests(), 2);
    }
}
