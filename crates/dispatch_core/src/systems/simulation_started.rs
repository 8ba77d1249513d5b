use bevy_ecs::prelude::{Query, Res, ResMut, Without};
use tracing::info;

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::config::DispatchConfig;
use crate::ecs::{OutOfService, Vehicle};
use crate::schedule::{Schedule, Task, TaskKind, TIME_UNDEFINED};
use crate::telemetry::{DispatchTelemetry, TransitionPhase};

/// Parks every vehicle on an open stay and seeds the periodic dispatch tick.
pub fn simulation_started_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<DispatchConfig>,
    mut telemetry: ResMut<DispatchTelemetry>,
    mut vehicles: Query<(&Vehicle, &mut Schedule), Without<OutOfService>>,
) {
    if event.0.kind != EventKind::SimulationStarted {
        return;
    }
    let now = clock.now();

    let mut fleet = 0usize;
    for (vehicle, mut schedule) in vehicles.iter_mut() {
        if !schedule.tasks().is_empty() {
            continue;
        }
        schedule
            .push(Task::planned(
                now,
                TIME_UNDEFINED,
                TaskKind::Stay { until_ms: None },
            ))
            .expect("empty schedule accepts a first task");
        schedule.start_current(now).expect("planned stay starts");
        telemetry.record_task(
            vehicle.id,
            TaskKind::Stay { until_ms: None },
            TransitionPhase::Started,
            now,
        );
        fleet += 1;
    }

    clock.schedule_in(config.dispatch_interval_ms(), EventKind::DispatchRun, None);
    info!(fleet, time_ms = now, "fleet in service");
}
