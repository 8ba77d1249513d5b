use bevy_ecs::prelude::{Query, Res, ResMut, Without};
use tracing::trace;

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::config::DispatchConfig;
use crate::ecs::{AtLink, FleetDirectory, OutOfService, Vehicle};
use crate::registry::{RequestRegistry, RequestStatus};
use crate::schedule::{Schedule, Task, TaskKind, TaskStatus, TIME_UNDEFINED};
use crate::telemetry::{DispatchTelemetry, TransitionPhase};

/// Drives one vehicle's task state machine as far as it can go at the
/// current time, scheduling the wake-up for whatever it blocks on.
pub fn task_advance_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<DispatchConfig>,
    directory: Res<FleetDirectory>,
    registry: Res<RequestRegistry>,
    mut telemetry: ResMut<DispatchTelemetry>,
    mut vehicles: Query<(&Vehicle, &AtLink, &mut Schedule), Without<OutOfService>>,
) {
    if event.0.kind != EventKind::TaskAdvance {
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

    loop {
        if let Some(task) = schedule.current().copied() {
            if task.status == TaskStatus::Started {
                // The only started task this system may finish is a stay
                // whose horizon has passed; drives and serves end through
                // their own events.
                let stay_over =
                    matches!(task.kind, TaskKind::Stay { .. }) && task.end_ms <= now;
                if !stay_over {
                    return;
                }
                let performed = schedule
                    .complete_current(now)
                    .expect("started task completes");
                telemetry.record_task(vehicle.id, performed.kind, TransitionPhase::Performed, now);
                continue;
            }
        }

        if schedule.is_exhausted() {
            // Nothing left: park the vehicle on an open stay.
            schedule
                .push(Task::planned(
                    now,
                    TIME_UNDEFINED,
                    TaskKind::Stay { until_ms: None },
                ))
                .expect("exhausted schedule has a closed tail");
            continue;
        }

        let task = *schedule.current().expect("not exhausted");
        debug_assert_eq!(task.status, TaskStatus::Planned);
        if task.begin_ms > now {
            clock.schedule_at(task.begin_ms, EventKind::TaskAdvance, subject);
            return;
        }

        let started = *schedule.start_current(now).expect("planned task starts");
        telemetry.record_task(vehicle.id, started.kind, TransitionPhase::Started, now);
        trace!(vehicle = %vehicle.id, task = started.kind.label(), time_ms = now, "task started");

        match started.kind {
            TaskKind::Drive { .. } => {
                clock.schedule_in(0, EventKind::MoveStep, subject);
                return;
            }
            TaskKind::Stay { until_ms: Some(until) } => {
                clock.schedule_at(until.max(now), EventKind::TaskAdvance, subject);
                return;
            }
            TaskKind::Stay { until_ms: None } => {
                // Idle: let the optimizer look for work around this vehicle.
                clock.schedule_in(0, EventKind::DispatchRun, subject);
                return;
            }
            TaskKind::Pickup { request } => {
                match registry.get(request).map(|r| (r.status, r.earliest_pickup_ms)) {
                    Some((RequestStatus::Planned, earliest)) => {
                        let done = now.max(earliest) + config.pickup_duration_ms();
                        clock.schedule_at(done, EventKind::ServeComplete, subject);
                        return;
                    }
                    _ => {
                        // Request aborted before the vehicle arrived: the
                        // pickup degenerates to a no-op and the orphaned
                        // tail legs are retracted.
                        let performed = schedule
                            .complete_current(now)
                            .expect("started task completes");
                        telemetry.record_task(
                            vehicle.id,
                            performed.kind,
                            TransitionPhase::Performed,
                            now,
                        );
                        schedule.retract_request(request);
                        clock.schedule_in(0, EventKind::DispatchRun, subject);
                        continue;
                    }
                }
            }
            TaskKind::Dropoff { .. } => {
                clock.schedule_at(
                    now + config.dropoff_duration_ms(),
                    EventKind::ServeComplete,
                    subject,
                );
                return;
            }
        }
    }
}
