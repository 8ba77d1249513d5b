//! Request lifecycle: UNPLANNED → PLANNED → PICKED_UP → COMPLETED, with
//! {UNPLANNED, PLANNED} → ABORTED. Transitions only move forward; any
//! out-of-order call is a caller bug and comes back as
//! [`InvalidStateTransition`].

use std::collections::BTreeMap;
use std::fmt;

use bevy_ecs::prelude::Resource;
use thiserror::Error;

use crate::ecs::VehicleId;
use crate::network::LinkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Unplanned,
    Planned,
    PickedUp,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// No feasible vehicle before the wait deadline elapsed.
    NoVehicleAvailable,
    /// The assigned vehicle lost its route and left service.
    VehicleOutOfService,
    /// Externally cancelled (passenger side; mechanism out of scope).
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub submitted_ms: u64,
    pub origin: LinkId,
    pub destination: LinkId,
    pub earliest_pickup_ms: u64,
    /// Absolute wait deadline; pickup must start at or before this time.
    pub latest_pickup_ms: u64,
    pub status: RequestStatus,
    pub assigned_vehicle: Option<VehicleId>,
    pub abort_reason: Option<AbortReason>,
}

impl Request {
    pub fn new(
        id: RequestId,
        submitted_ms: u64,
        origin: LinkId,
        destination: LinkId,
        max_wait_ms: u64,
    ) -> Self {
        Self {
            id,
            submitted_ms,
            origin,
            destination,
            earliest_pickup_ms: submitted_ms,
            latest_pickup_ms: submitted_ms.saturating_add(max_wait_ms),
            status: RequestStatus::Unplanned,
            assigned_vehicle: None,
            abort_reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidStateTransition {
    #[error("{0} is not registered")]
    UnknownRequest(RequestId),
    #[error("{0} is already registered")]
    DuplicateRequest(RequestId),
    #[error("{request}: cannot move from {from:?} to {to:?}")]
    IllegalMove {
        request: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
}

/// Registry of all live trip requests. Completed and aborted requests are
/// archived out of the active map; their records remain readable.
#[derive(Debug, Default, Resource)]
pub struct RequestRegistry {
    active: BTreeMap<RequestId, Request>,
    archived: Vec<Request>,
}

impl RequestRegistry {
    pub fn submit(&mut self, request: Request) -> Result<(), InvalidStateTransition> {
        if request.status != RequestStatus::Unplanned {
            return Err(InvalidStateTransition::IllegalMove {
                request: request.id,
                from: request.status,
                to: RequestStatus::Unplanned,
            });
        }
        if self.active.contains_key(&request.id) {
            return Err(InvalidStateTransition::DuplicateRequest(request.id));
        }
        self.active.insert(request.id, request);
        Ok(())
    }

    pub fn mark_planned(
        &mut self,
        id: RequestId,
        vehicle: VehicleId,
    ) -> Result<&Request, InvalidStateTransition> {
        let request = self.transition(id, RequestStatus::Unplanned, RequestStatus::Planned)?;
        request.assigned_vehicle = Some(vehicle);
        Ok(request)
    }

    pub fn mark_picked_up(&mut self, id: RequestId) -> Result<&Request, InvalidStateTransition> {
        self.transition(id, RequestStatus::Planned, RequestStatus::PickedUp)
            .map(|r| &*r)
    }

    pub fn mark_completed(&mut self, id: RequestId) -> Result<(), InvalidStateTransition> {
        self.transition(id, RequestStatus::PickedUp, RequestStatus::Completed)?;
        self.archive(id);
        Ok(())
    }

    pub fn abort(
        &mut self,
        id: RequestId,
        reason: AbortReason,
    ) -> Result<(), InvalidStateTransition> {
        let request = self
            .active
            .get_mut(&id)
            .ok_or(InvalidStateTransition::UnknownRequest(id))?;
        match request.status {
            RequestStatus::Unplanned | RequestStatus::Planned => {
                request.status = RequestStatus::Aborted;
                request.abort_reason = Some(reason);
                self.archive(id);
                Ok(())
            }
            // A picked-up passenger is on board; the trip must complete.
            from => Err(InvalidStateTransition::IllegalMove {
                request: id,
                from,
                to: RequestStatus::Aborted,
            }),
        }
    }

    fn transition(
        &mut self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    ) -> Result<&mut Request, InvalidStateTransition> {
        let request = self
            .active
            .get_mut(&id)
            .ok_or(InvalidStateTransition::UnknownRequest(id))?;
        if request.status != from {
            return Err(InvalidStateTransition::IllegalMove {
                request: id,
                from: request.status,
                to,
            });
        }
        request.status = to;
        Ok(request)
    }

    fn archive(&mut self, id: RequestId) {
        if let Some(request) = self.active.remove(&id) {
            self.archived.push(request);
        }
    }

    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.active.get(&id)
    }

    /// Active requests awaiting a vehicle, fairest first:
    /// ascending submission time, ties by lower id.
    pub fn unplanned_in_submission_order(&self) -> Vec<RequestId> {
        let mut ids: Vec<(u64, RequestId)> = self
            .active
            .values()
            .filter(|r| r.status == RequestStatus::Unplanned)
            .map(|r| (r.submitted_ms, r.id))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Terminal settlement when `vehicle` leaves service: every request it
    /// owns, planned or already on board, archives as aborted with
    /// `VehicleOutOfService`. Returns the settled ids.
    /// An on-board request cannot `abort` through the normal path, so a
    /// lost vehicle must settle it here or it would stay active forever.
    pub fn settle_vehicle_loss(&mut self, vehicle: VehicleId) -> Vec<RequestId> {
        let ids: Vec<RequestId> = self
            .active
            .values()
            .filter(|r| {
                r.assigned_vehicle == Some(vehicle)
                    && matches!(r.status, RequestStatus::Planned | RequestStatus::PickedUp)
            })
            .map(|r| r.id)
            .collect();
        for id in &ids {
            if let Some(request) = self.active.get_mut(id) {
                request.status = RequestStatus::Aborted;
                request.abort_reason = Some(AbortReason::VehicleOutOfService);
            }
            self.archive(*id);
        }
        ids
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn archived(&self) -> &[Request] {
        &self.archived
    }

    pub fn archived_record(&self, id: RequestId) -> Option<&Request> {
        self.archived.iter().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: u64) -> Request {
        Request::new(RequestId(id), 0, LinkId(0), LinkId(1), 600_000)
    }

    #[test]
    fn lifecycle_runs_forward_and_archives() {
        let mut registry = RequestRegistry::default();
        registry.submit(request(1)).expect("submit");

        registry
            .mark_planned(RequestId(1), VehicleId(7))
            .expect("plan");
        assert_eq!(
            registry.get(RequestId(1)).map(|r| r.assigned_vehicle),
            Some(Some(VehicleId(7)))
        );

        registry.mark_picked_up(RequestId(1)).expect("pickup");
        registry.mark_completed(RequestId(1)).expect("complete");

        assert!(registry.get(RequestId(1)).is_none());
        let record = registry.archived_record(RequestId(1)).expect("archived");
        assert_eq!(record.status, RequestStatus::Completed);
    }

    #[test]
    fn out_of_order_calls_are_invalid_transitions() {
        let mut registry = RequestRegistry::default();
        registry.submit(request(1)).expect("submit");

        assert_eq!(
            registry.mark_picked_up(RequestId(1)),
            Err(InvalidStateTransition::IllegalMove {
                request: RequestId(1),
                from: RequestStatus::Unplanned,
                to: RequestStatus::PickedUp,
            })
        );
        assert!(matches!(
            registry.mark_completed(RequestId(1)),
            Err(InvalidStateTransition::IllegalMove { .. })
        ));
        assert_eq!(
            registry.mark_planned(RequestId(9), VehicleId(1)).err(),
            Some(InvalidStateTransition::UnknownRequest(RequestId(9)))
        );
    }

    #[test]
    fn picked_up_requests_cannot_abort() {
        let mut registry = RequestRegistry::default();
        registry.submit(request(1)).expect("submit");
        registry
            .mark_planned(RequestId(1), VehicleId(1))
            .expect("plan");

        registry
            .abort(RequestId(1), AbortReason::Cancelled)
            .expect("planned requests may abort");

        registry.submit(request(2)).expect("submit");
        registry
            .mark_planned(RequestId(2), VehicleId(1))
            .expect("plan");
        registry.mark_picked_up(RequestId(2)).expect("pickup");
        assert!(matches!(
            registry.abort(RequestId(2), AbortReason::Cancelled),
            Err(InvalidStateTransition::IllegalMove { .. })
        ));
    }

    #[test]
    fn vehicle_loss_settles_planned_and_on_board_requests() {
        let mut registry = RequestRegistry::default();
        registry.submit(request(1)).expect("submit");
        registry
            .mark_planned(RequestId(1), VehicleId(1))
            .expect("plan");
        registry.submit(request(2)).expect("submit");
        registry
            .mark_planned(RequestId(2), VehicleId(1))
            .expect("plan");
        registry.mark_picked_up(RequestId(2)).expect("pickup");
        registry.submit(request(3)).expect("submit");
        registry
            .mark_planned(RequestId(3), VehicleId(2))
            .expect("plan");

        let settled = registry.settle_vehicle_loss(VehicleId(1));
        assert_eq!(settled, vec![RequestId(1), RequestId(2)]);
        assert_eq!(registry.active_count(), 1);
        for id in settled {
            let record = registry.archived_record(id).expect("archived");
            assert_eq!(record.status, RequestStatus::Aborted);
            assert_eq!(record.abort_reason, Some(AbortReason::VehicleOutOfService));
        }
        // The other vehicle's request is untouched.
        assert_eq!(
            registry.get(RequestId(3)).map(|r| r.status),
            Some(RequestStatus::Planned)
        );
    }

    #[test]
    fn unplanned_order_is_submission_time_then_id() {
        let mut registry = RequestRegistry::default();
        let mut late = request(1);
        late.submitted_ms = 50;
        registry.submit(late).expect("submit");
        let mut early_high_id = request(9);
        early_high_id.submitted_ms = 10;
        registry.submit(early_high_id).expect("submit");
        let mut early_low_id = request(3);
        early_low_id.submitted_ms = 10;
        registry.submit(early_low_id).expect("submit");

        assert_eq!(
            registry.unplanned_in_submission_order(),
            vec![RequestId(3), RequestId(9), RequestId(1)]
        );
    }
}
