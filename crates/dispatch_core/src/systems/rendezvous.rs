use bevy_ecs::prelude::{Query, Res, ResMut, Without};
use tracing::{info, warn};

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::ecs::{AtLink, FleetDirectory, OutOfService, Vehicle};
use crate::registry::{RequestRegistry, RequestStatus};
use crate::schedule::{Schedule, TaskKind, TaskStatus};
use crate::telemetry::{DispatchTelemetry, TransitionPhase};

/// Finishes a pickup or dropoff hold: flips the request state, performs the
/// serve task and hands the vehicle back to the task state machine.
pub fn serve_complete_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    directory: Res<FleetDirectory>,
    mut registry: ResMut<RequestRegistry>,
    mut telemetry: ResMut<DispatchTelemetry>,
    mut vehicles: Query<(&Vehicle, &AtLink, &mut Schedule), Without<OutOfService>>,
) {
    if event.0.kind != EventKind::ServeComplete {
        return;
    }
    let Some(EventSubject::Vehicle(vehicle_id)) = event.0.subject else {
        return;
    };
    let Some(entity) = directory.entity(vehicle_id) else {
        return;
    };
    let Ok((vehicle, _, mut schedule)) = vehicles.get_mut(entity) else {
        return;
    };
    let now = clock.now();
    let subject = Some(EventSubject::Vehicle(vehicle.id));

    let kind = match schedule.current() {
        Some(task) if task.status == TaskStatus::Started => task.kind,
        _ => return,
    };

    match kind {
        TaskKind::Pickup { request } => match registry.mark_picked_up(request) {
            Ok(_) => {
                telemetry.record_request(request, RequestStatus::PickedUp, now);
                info!(request = %request, vehicle = %vehicle.id, time_ms = now, "passenger on board");
            }
            Err(err) => {
                // Aborted while the vehicle held at the curb: drop the
                // orphaned haul and dropoff legs instead of boarding.
                warn!(request = %request, %err, "pickup completed without a passenger");
                let performed = schedule
                    .complete_current(now)
                    .expect("started serve completes");
                telemetry.record_task(vehicle.id, performed.kind, TransitionPhase::Performed, now);
                schedule.retract_request(request);
                clock.schedule_in(0, EventKind::TaskAdvance, subject);
                return;
            }
        },
        TaskKind::Dropoff { request } => {
            registry
                .mark_completed(request)
                .expect("picked-up request completes");
            telemetry.record_request(request, RequestStatus::Completed, now);
            info!(request = %request, vehicle = %vehicle.id, time_ms = now, "trip completed");
        }
        _ => return,
    }

    let performed = schedule
        .complete_current(now)
        .expect("started serve completes");
    telemetry.record_task(vehicle.id, performed.kind, TransitionPhase::Performed, now);
    clock.schedule_in(0, EventKind::TaskAdvance, subject);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::{Schedule as EcsSchedule, World};
    use std::sync::Arc;

    use crate::clock::Event;
    use crate::config::DispatchConfig;
    use crate::ecs::VehicleId;
    use crate::network::LinkId;
    use crate::registry::{Request, RequestId};
    use crate::schedule::Task;
    use crate::test_helpers::{create_test_world, line_network, spawn_vehicle};

    fn serve(world: &mut World, vehicle: u64) {
        let now = world.resource::<SimulationClock>().now();
        world.insert_resource(CurrentEvent(Event {
            timestamp: now,
            kind: EventKind::ServeComplete,
            subject: Some(EventSubject::Vehicle(VehicleId(vehicle))),
        }));
        let mut schedule = EcsSchedule::default();
        schedule.add_systems(serve_complete_system);
        schedule.run(world);
    }

    #[test]
    fn pickup_then_dropoff_walk_the_request_to_completed() {
        let network = Arc::new(line_network(3));
        let mut world = create_test_world(network, DispatchConfig::default());
        let entity = spawn_vehicle(&mut world, 2, LinkId(0), 4);

        world
            .resource_mut::<RequestRegistry>()
            .submit(Request::new(RequestId(5), 0, LinkId(0), LinkId(2), 600_000))
            .expect("submit");
        world
            .resource_mut::<RequestRegistry>()
            .mark_planned(RequestId(5), VehicleId(2))
            .expect("plan");
        {
            let mut schedule = world.get_mut::<Schedule>(entity).expect("schedule");
            schedule
                .push(Task::planned(0, 120_000, TaskKind::Pickup { request: RequestId(5) }))
                .expect("push");
            schedule
                .push(Task::planned(
                    120_000,
                    180_000,
                    TaskKind::Dropoff { request: RequestId(5) },
                ))
                .expect("push");
            schedule.start_current(0).expect("start");
        }

        serve(&mut world, 2);
        assert_eq!(
            world
                .resource::<RequestRegistry>()
                .get(RequestId(5))
                .map(|r| r.status),
            Some(RequestStatus::PickedUp)
        );

        world
            .get_mut::<Schedule>(entity)
            .expect("schedule")
            .start_current(0)
            .expect("start dropoff");
        serve(&mut world, 2);
        let registry = world.resource::<RequestRegistry>();
        assert!(registry.get(RequestId(5)).is_none());
        assert_eq!(
            registry.archived_record(RequestId(5)).map(|r| r.status),
            Some(RequestStatus::Completed)
        );
    }
}
