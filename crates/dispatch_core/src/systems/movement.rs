use bevy_ecs::prelude::{Commands, Query, Res, ResMut, Without};
use tracing::error;

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock, ONE_SEC_MS};
use crate::ecs::{AtLink, FleetDirectory, OutOfService, Vehicle};
use crate::network::{NetworkResource, RouteLost, RouteOracleResource};
use crate::registry::{RequestRegistry, RequestStatus};
use crate::schedule::{Schedule, TaskKind, TaskStatus};
use crate::telemetry::{DispatchTelemetry, TransitionPhase};
use crate::zones::ZonalIndex;

/// Advances a vehicle one link along its started drive task. When the route
/// oracle cannot continue the route the vehicle leaves service and its
/// planned requests are returned to the registry as aborted.
pub fn movement_system(
    event: Res<CurrentEvent>,
    mut commands: Commands,
    mut clock: ResMut<SimulationClock>,
    network: Res<NetworkResource>,
    oracle: Res<RouteOracleResource>,
    directory: Res<FleetDirectory>,
    mut registry: ResMut<RequestRegistry>,
    mut telemetry: ResMut<DispatchTelemetry>,
    mut zones: ResMut<ZonalIndex>,
    mut vehicles: Query<(&Vehicle, &mut AtLink, &mut Schedule), Without<OutOfService>>,
) {
    if event.0.kind != EventKind::MoveStep {
        return;
    }
    let Some(EventSubject::Vehicle(vehicle_id)) = event.0.subject else {
        return;
    };
    let Some(entity) = directory.entity(vehicle_id) else {
        return;
    };
    let Ok((vehicle, mut at, mut schedule)) = vehicles.get_mut(entity) else {
        return;
    };
    let now = clock.now();
    let subject = Some(EventSubject::Vehicle(vehicle.id));

    // Stale move events can outlive the drive they were scheduled for.
    let destination = match schedule.current() {
        Some(task) if task.status == TaskStatus::Started => match task.kind {
            TaskKind::Drive { to } => to,
            _ => return,
        },
        _ => return,
    };

    if at.0 == destination {
        let performed = schedule
            .complete_current(now)
            .expect("started drive completes");
        telemetry.record_task(vehicle.id, performed.kind, TransitionPhase::Performed, now);
        clock.schedule_in(0, EventKind::TaskAdvance, subject);
        return;
    }

    match oracle.0.next_link(at.0, destination) {
        Some(next) if next != at.0 => {
            at.0 = next;
            let hop = network
                .0
                .link(next)
                .map(|link| link.traversal_ms())
                .unwrap_or(ONE_SEC_MS);
            clock.schedule_in(hop.max(1), EventKind::MoveStep, subject);
        }
        Some(_) => {
            // Oracle says we are already there.
            let performed = schedule
                .complete_current(now)
                .expect("started drive completes");
            telemetry.record_task(vehicle.id, performed.kind, TransitionPhase::Performed, now);
            clock.schedule_in(0, EventKind::TaskAdvance, subject);
        }
        None => {
            let lost = RouteLost {
                from: at.0,
                to: destination,
            };
            error!(vehicle = %vehicle.id, %lost, "vehicle leaves service");
            telemetry.record_vehicle_lost(vehicle.id, now);
            zones.remove_idle_vehicle(vehicle.id);
            for request_id in registry.settle_vehicle_loss(vehicle.id) {
                telemetry.record_request(request_id, RequestStatus::Aborted, now);
            }
            commands.entity(entity).insert(OutOfService);
        }
    }
}
