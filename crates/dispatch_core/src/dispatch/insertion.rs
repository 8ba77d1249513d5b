//! Tail-insertion feasibility and commit. Evaluation is read-only and
//! returns `None` for any infeasible candidate (deadline or capacity);
//! infeasibility is an expected outcome, never an error.

use crate::ecs::Vehicle;
use crate::network::{LinkId, TravelEstimator};
use crate::registry::Request;
use crate::schedule::{Schedule, ScheduleError, Task, TaskKind, TaskStatus};
use crate::zones::ZoneId;

#[derive(Debug, Clone, Copy)]
pub struct InsertionCandidate {
    pub vehicle: crate::ecs::VehicleId,
    /// Zone the vehicle serves the pickup from (its tail position).
    pub vehicle_zone: Option<ZoneId>,
    /// When boarding could begin.
    pub pickup_begin_ms: u64,
    /// Passenger wait from earliest pickup to boarding.
    pub wait_ms: u64,
}

/// When the schedule tail can take new work: stays are replaceable, a
/// performed tail means "ready now", anything else ends at its planned end.
fn tail_ready_ms(schedule: &Schedule, now_ms: u64) -> u64 {
    for task in schedule.tasks().iter().rev() {
        if matches!(task.kind, TaskKind::Stay { .. }) && task.status != TaskStatus::Performed {
            continue;
        }
        if task.status == TaskStatus::Performed {
            return now_ms;
        }
        return task.end_ms.max(now_ms);
    }
    now_ms
}

/// Evaluates appending the pickup/dropoff pair for `request` at the tail of
/// `schedule`. Returns `None` when the insertion is infeasible.
pub fn evaluate_tail_insertion(
    request: &Request,
    vehicle: &Vehicle,
    at: LinkId,
    schedule: &Schedule,
    vehicle_zone: Option<ZoneId>,
    now_ms: u64,
    estimator: &dyn TravelEstimator,
) -> Option<InsertionCandidate> {
    if schedule.occupancy_at_tail() + 1 > vehicle.capacity {
        return None;
    }

    let depart_ms = tail_ready_ms(schedule, now_ms);
    let tail_link = schedule.tail_link(at);
    let approach = estimator.estimate(tail_link, request.origin, depart_ms);
    let arrival_ms = depart_ms + approach.duration_ms;
    let pickup_begin_ms = arrival_ms.max(request.earliest_pickup_ms);
    if pickup_begin_ms > request.latest_pickup_ms {
        return None;
    }

    Some(InsertionCandidate {
        vehicle: vehicle.id,
        vehicle_zone,
        pickup_begin_ms,
        wait_ms: pickup_begin_ms - request.earliest_pickup_ms,
    })
}

/// Commits the pair at the tail: truncates any stay, then appends
/// approach drive (unless already at the origin), pickup, haul drive
/// (unless origin equals destination), and dropoff.
pub fn commit_tail_insertion(
    request: &Request,
    schedule: &mut Schedule,
    at: LinkId,
    now_ms: u64,
    estimator: &dyn TravelEstimator,
    pickup_duration_ms: u64,
    dropoff_duration_ms: u64,
) -> Result<(), ScheduleError> {
    let mut t = schedule.prepare_tail(now_ms);
    let tail_link = schedule.tail_link(at);

    if tail_link != request.origin {
        let leg = estimator.estimate(tail_link, request.origin, t);
        schedule.push(Task::planned(
            t,
            t + leg.duration_ms,
            TaskKind::Drive { to: request.origin },
        ))?;
        t += leg.duration_ms;
    }

    let pickup_end = t.max(request.earliest_pickup_ms) + pickup_duration_ms;
    schedule.push(Task::planned(
        t,
        pickup_end,
        TaskKind::Pickup { request: request.id },
    ))?;
    t = pickup_end;

    if request.origin != request.destination {
        let leg = estimator.estimate(request.origin, request.destination, t);
        schedule.push(Task::planned(
            t,
            t + leg.duration_ms,
            TaskKind::Drive {
                to: request.destination,
            },
        ))?;
        t += leg.duration_ms;
    }

    schedule.push(Task::planned(
        t,
        t + dropoff_duration_ms,
        TaskKind::Dropoff { request: request.id },
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::ecs::{Vehicle, VehicleId};
    use crate::network::BeelineEstimator;
    use crate::registry::{Request, RequestId};
    use crate::test_helpers::line_network;

    fn estimator() -> BeelineEstimator {
        BeelineEstimator::new(Arc::new(line_network(4)), 10.0)
    }

    fn vehicle() -> Vehicle {
        Vehicle {
            id: VehicleId(1),
            capacity: 4,
        }
    }

    #[test]
    fn feasible_insertion_reports_wait_time() {
        let estimator = estimator();
        // 100 m per link at 10 m/s beeline: ~10 s to the next link.
        let request = Request::new(RequestId(1), 0, LinkId(1), LinkId(3), 600_000);
        let schedule = Schedule::default();

        let candidate = evaluate_tail_insertion(
            &request,
            &vehicle(),
            LinkId(0),
            &schedule,
            None,
            0,
            &estimator,
        )
        .expect("feasible");
        assert_eq!(candidate.wait_ms, 10_000);
        assert_eq!(candidate.pickup_begin_ms, 10_000);
    }

    #[test]
    fn deadline_violation_is_silently_infeasible() {
        let estimator = estimator();
        let request = Request::new(RequestId(1), 0, LinkId(3), LinkId(0), 5_000);
        let schedule = Schedule::default();

        assert!(evaluate_tail_insertion(
            &request,
            &vehicle(),
            LinkId(0),
            &schedule,
            None,
            0,
            &estimator,
        )
        .is_none());
    }

    #[test]
    fn full_vehicle_is_infeasible() {
        let estimator = estimator();
        let request = Request::new(RequestId(2), 0, LinkId(1), LinkId(2), 600_000);
        let mut schedule = Schedule::default();
        schedule
            .push(Task::planned(0, 60, TaskKind::Pickup { request: RequestId(1) }))
            .expect("seat taken, no dropoff queued");

        let single_seat = Vehicle {
            id: VehicleId(1),
            capacity: 1,
        };
        assert!(evaluate_tail_insertion(
            &request,
            &single_seat,
            LinkId(0),
            &schedule,
            None,
            0,
            &estimator,
        )
        .is_none());
    }

    #[test]
    fn commit_appends_the_full_task_chain() {
        let estimator = estimator();
        let request = Request::new(RequestId(1), 0, LinkId(1), LinkId(3), 600_000);
        let mut schedule = Schedule::default();

        commit_tail_insertion(&request, &mut schedule, LinkId(0), 0, &estimator, 120_000, 60_000)
            .expect("commit");

        let kinds: Vec<&'static str> = schedule.tasks().iter().map(|t| t.kind.label()).collect();
        assert_eq!(kinds, vec!["drive", "pickup", "drive", "dropoff"]);
        schedule.validate().expect("contiguous");
    }

    #[test]
    fn commit_skips_trivial_approach_leg() {
        let estimator = estimator();
        let request = Request::new(RequestId(1), 0, LinkId(0), LinkId(2), 600_000);
        let mut schedule = Schedule::default();

        commit_tail_insertion(&request, &mut schedule, LinkId(0), 0, &estimator, 120_000, 60_000)
            .expect("commit");

        let kinds: Vec<&'static str> = schedule.tasks().iter().map(|t| t.kind.label()).collect();
        assert_eq!(kinds, vec!["pickup", "drive", "dropoff"]);
    }
}
