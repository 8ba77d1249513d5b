//! Event streams produced for the (excluded) reporting layer: task
//! transitions per vehicle and request lifecycle transitions.

use bevy_ecs::prelude::Resource;

use crate::ecs::VehicleId;
use crate::registry::{RequestId, RequestStatus};
use crate::schedule::TaskKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    Started,
    Performed,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskTransition {
    pub vehicle: VehicleId,
    pub kind: TaskKind,
    pub phase: TransitionPhase,
    pub time_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestTransition {
    pub request: RequestId,
    pub status: RequestStatus,
    pub time_ms: u64,
}

/// Collects the dispatch core's outbound event streams.
#[derive(Debug, Default, Resource)]
pub struct DispatchTelemetry {
    pub task_transitions: Vec<TaskTransition>,
    pub request_transitions: Vec<RequestTransition>,
    pub vehicles_lost: Vec<(VehicleId, u64)>,
}

impl DispatchTelemetry {
    pub fn record_task(
        &mut self,
        vehicle: VehicleId,
        kind: TaskKind,
        phase: TransitionPhase,
        time_ms: u64,
    ) {
        self.task_transitions.push(TaskTransition {
            vehicle,
            kind,
            phase,
            time_ms,
        });
    }

    pub fn record_request(&mut self, request: RequestId, status: RequestStatus, time_ms: u64) {
        self.request_transitions.push(RequestTransition {
            request,
            status,
            time_ms,
        });
    }

    pub fn record_vehicle_lost(&mut self, vehicle: VehicleId, time_ms: u64) {
        self.vehicles_lost.push((vehicle, time_ms));
    }

    pub fn request_history(&self, request: RequestId) -> Vec<RequestStatus> {
        self.request_transitions
            .iter()
            .filter(|t| t.request == request)
            .map(|t| t.status)
            .collect()
    }

    pub fn completed_requests(&self) -> usize {
        self.request_transitions
            .iter()
            .filter(|t| t.status == RequestStatus::Completed)
            .count()
    }

    pub fn aborted_requests(&self) -> usize {
        self.request_transitions
            .iter()
            .filter(|t| t.status == RequestStatus::Aborted)
            .count()
    }
}
