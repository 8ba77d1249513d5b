//! Discrete-event loop: pops the next clock event, exposes it as
//! [`CurrentEvent`] and runs the system schedule over it.

use bevy_ecs::prelude::Res;
use bevy_ecs::prelude::{Schedule as EcsSchedule, World};
use bevy_ecs::schedule::{apply_deferred, IntoSystemConfigs};
use tracing::debug;

use crate::clock::{CurrentEvent, Event, EventKind, SimulationClock};
use crate::systems::{
    dispatch::dispatch_system, movement::movement_system, rendezvous::serve_complete_system,
    request_submitted::request_submitted_system, simulation_started::simulation_started_system,
    task_advance::task_advance_system, zone_index::update_zone_index_system,
};

// Condition functions for each event kind
fn is_simulation_started(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::SimulationStarted)
        .unwrap_or(false)
}

fn is_request_submitted(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::RequestSubmitted)
        .unwrap_or(false)
}

fn is_task_advance(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::TaskAdvance)
        .unwrap_or(false)
}

fn is_move_step(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::MoveStep)
        .unwrap_or(false)
}

fn is_serve_complete(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::ServeComplete)
        .unwrap_or(false)
}

fn is_dispatch_run(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::DispatchRun)
        .unwrap_or(false)
}

/// One system per event kind, gated on the current event, followed by the
/// always-on index maintenance after deferred commands are applied.
pub fn simulation_schedule() -> EcsSchedule {
    let mut schedule = EcsSchedule::default();
    schedule.add_systems(
        (
            simulation_started_system.run_if(is_simulation_started),
            request_submitted_system.run_if(is_request_submitted),
            task_advance_system.run_if(is_task_advance),
            movement_system.run_if(is_move_step),
            serve_complete_system.run_if(is_serve_complete),
            dispatch_system.run_if(is_dispatch_run),
            apply_deferred,
            update_zone_index_system,
        )
            .chain(),
    );
    schedule
}

/// Processes the next pending event, if any, and returns it.
pub fn run_next_event(world: &mut World, schedule: &mut EcsSchedule) -> Option<Event> {
    let event = world.resource_mut::<SimulationClock>().pop_next()?;
    world.insert_resource(CurrentEvent(event));
    schedule.run(world);
    Some(event)
}

/// Runs until the event queue drains or `max_steps` is reached. Returns the
/// number of events processed.
pub fn run_until_empty(world: &mut World, schedule: &mut EcsSchedule, max_steps: u64) -> u64 {
    let mut processed = 0;
    while processed < max_steps && run_next_event(world, schedule).is_some() {
        processed += 1;
    }
    debug!(processed, "event queue drained");
    processed
}

/// Runs while pending events start at or before `end_ms`.
pub fn run_until(world: &mut World, schedule: &mut EcsSchedule, end_ms: u64) -> u64 {
    let mut processed = 0;
    loop {
        let due = world
            .resource::<SimulationClock>()
            .next_event_time()
            .is_some_and(|t| t <= end_ms);
        if !due || run_next_event(world, schedule).is_none() {
            break;
        }
        processed += 1;
    }
    processed
}
