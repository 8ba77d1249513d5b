use bevy_ecs::prelude::{Res, ResMut};
use tracing::debug;

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::registry::{RequestRegistry, RequestStatus};
use crate::scenario::PendingRequests;
use crate::telemetry::DispatchTelemetry;
use crate::zones::ZonalIndex;

/// Moves due pending requests into the registry and triggers an immediate
/// dispatch pass for each.
pub fn request_submitted_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    mut pending: ResMut<PendingRequests>,
    mut registry: ResMut<RequestRegistry>,
    mut zones: ResMut<ZonalIndex>,
    mut telemetry: ResMut<DispatchTelemetry>,
) {
    if event.0.kind != EventKind::RequestSubmitted {
        return;
    }
    let now = clock.now();

    while pending
        .0
        .front()
        .is_some_and(|request| request.submitted_ms <= now)
    {
        let request = pending.0.pop_front().expect("front checked above");
        let id = request.id;
        let origin = request.origin;
        registry
            .submit(request)
            .expect("pending requests are unplanned and unique");
        zones.insert_pending_request(id, origin);
        telemetry.record_request(id, RequestStatus::Unplanned, now);
        debug!(request = %id, time_ms = now, "request submitted");

        clock.schedule_in(0, EventKind::DispatchRun, Some(EventSubject::Request(id)));
    }
}
