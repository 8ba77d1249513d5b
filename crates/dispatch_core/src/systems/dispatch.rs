use bevy_ecs::prelude::{Query, Res, ResMut, Without};
use tracing::{debug, info, warn};

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::config::DispatchConfig;
use crate::dispatch::insertion::{commit_tail_insertion, evaluate_tail_insertion, InsertionCandidate};
use crate::dispatch::GoalFunctionResource;
use crate::ecs::{AtLink, FleetDirectory, OutOfService, Vehicle};
use crate::network::TravelEstimatorResource;
use crate::registry::{AbortReason, RequestRegistry, RequestStatus};
use crate::scenario::PendingRequests;
use crate::schedule::Schedule;
use crate::telemetry::DispatchTelemetry;
use crate::zones::{ZonalIndex, ZoneBalance};

/// One optimizer pass: walks unplanned requests in submission order, scores
/// tail insertions on nearby idle vehicles with the configured goal function
/// and commits the cheapest feasible one per request.
///
/// A run with no subject is the periodic tick and reschedules itself; a run
/// with a vehicle subject only considers requests near that vehicle.
pub fn dispatch_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<DispatchConfig>,
    goal: Res<GoalFunctionResource>,
    estimator: Res<TravelEstimatorResource>,
    directory: Res<FleetDirectory>,
    pending: Res<PendingRequests>,
    mut zones: ResMut<ZonalIndex>,
    mut balance: ResMut<ZoneBalance>,
    mut registry: ResMut<RequestRegistry>,
    mut telemetry: ResMut<DispatchTelemetry>,
    mut vehicles: Query<(&Vehicle, &AtLink, &mut Schedule), Without<OutOfService>>,
) {
    if event.0.kind != EventKind::DispatchRun {
        return;
    }
    let now = clock.now();
    balance.refresh_from(&zones);

    // A vehicle-triggered run is scoped to the requests around that vehicle.
    let scope = match event.0.subject {
        Some(EventSubject::Vehicle(vehicle_id)) => directory
            .entity(vehicle_id)
            .and_then(|entity| vehicles.get(entity).ok())
            .and_then(|(_, at, schedule)| zones.zone_of(schedule.tail_link(at.0)))
            .map(|zone| {
                zones.nearby_requests(
                    zone,
                    config.expansion_distance_m,
                    config.nearest_requests_limit,
                )
            }),
        _ => None,
    };

    let mut planned = 0usize;
    for request_id in registry.unplanned_in_submission_order() {
        if let Some(scope) = &scope {
            if !scope.contains(&request_id) {
                continue;
            }
        }
        let Some(request) = registry.get(request_id).cloned() else {
            continue;
        };
        let Some(origin_zone) = zones.zone_of(request.origin) else {
            continue;
        };

        let mut best: Option<(f64, InsertionCandidate)> = None;
        for vehicle_id in zones.nearby_vehicles(
            origin_zone,
            config.expansion_distance_m,
            config.nearest_vehicles_limit,
        ) {
            let Some(entity) = directory.entity(vehicle_id) else {
                continue;
            };
            let Ok((vehicle, at, schedule)) = vehicles.get(entity) else {
                continue;
            };
            let vehicle_zone = zones.zone_of(schedule.tail_link(at.0));
            let Some(candidate) = evaluate_tail_insertion(
                &request,
                vehicle,
                at.0,
                schedule,
                vehicle_zone,
                now,
                estimator.0.as_ref(),
            ) else {
                continue;
            };
            let cost = goal.cost(&candidate, &balance);
            let better = match &best {
                None => true,
                Some((best_cost, best_candidate)) => {
                    cost < *best_cost
                        || (cost == *best_cost && candidate.vehicle < best_candidate.vehicle)
                }
            };
            if better {
                best = Some((cost, candidate));
            }
        }

        match best {
            Some((cost, candidate)) => {
                let entity = directory
                    .entity(candidate.vehicle)
                    .expect("scored vehicle stays registered");
                let Ok((_, at, mut schedule)) = vehicles.get_mut(entity) else {
                    continue;
                };
                commit_tail_insertion(
                    &request,
                    &mut schedule,
                    at.0,
                    now,
                    estimator.0.as_ref(),
                    config.pickup_duration_ms(),
                    config.dropoff_duration_ms(),
                )
                .expect("scored insertion is feasible");
                registry
                    .mark_planned(request_id, candidate.vehicle)
                    .expect("unplanned request accepts planning");
                zones.remove_pending_request(request_id);
                zones.remove_idle_vehicle(candidate.vehicle);
                telemetry.record_request(request_id, RequestStatus::Planned, now);
                info!(
                    request = %request_id,
                    vehicle = %candidate.vehicle,
                    cost,
                    goal = goal.name(),
                    "request planned"
                );
                clock.schedule_in(
                    0,
                    EventKind::TaskAdvance,
                    Some(EventSubject::Vehicle(candidate.vehicle)),
                );
                planned += 1;
            }
            None => {
                if now > request.latest_pickup_ms {
                    registry
                        .abort(request_id, AbortReason::NoVehicleAvailable)
                        .expect("unplanned request accepts abort");
                    zones.remove_pending_request(request_id);
                    telemetry.record_request(request_id, RequestStatus::Aborted, now);
                    warn!(request = %request_id, "no vehicle available before deadline");
                }
            }
        }
    }

    if planned > 0 {
        debug!(planned, time_ms = now, "dispatch pass committed insertions");
    }
    // The periodic tick keeps itself alive while demand is outstanding.
    if event.0.subject.is_none() && (registry.active_count() > 0 || !pending.0.is_empty()) {
        clock.schedule_in(config.dispatch_interval_ms(), EventKind::DispatchRun, None);
    }
}
