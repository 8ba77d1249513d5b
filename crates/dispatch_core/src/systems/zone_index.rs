use bevy_ecs::prelude::{Added, Changed, Or, Query, ResMut};

use crate::ecs::{AtLink, OutOfService, Vehicle};
use crate::schedule::Schedule;
use crate::zones::ZonalIndex;

/// Keeps the zonal idle-vehicle index in step with schedule and position
/// changes. Runs after every event step.
pub fn update_zone_index_system(
    mut zones: ResMut<ZonalIndex>,
    changed: Query<
        (&Vehicle, &AtLink, &Schedule, Option<&OutOfService>),
        Or<(Changed<Schedule>, Changed<AtLink>, Added<Vehicle>)>,
    >,
) {
    for (vehicle, at, schedule, out_of_service) in changed.iter() {
        if out_of_service.is_none() && schedule.is_idle() {
            zones.insert_idle_vehicle(vehicle.id, schedule.tail_link(at.0));
        } else {
            zones.remove_idle_vehicle(vehicle.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::Schedule as EcsSchedule;
    use std::sync::Arc;

    use crate::config::DispatchConfig;
    use crate::ecs::VehicleId;
    use crate::network::LinkId;
    use crate::schedule::{Task, TaskKind};
    use crate::test_helpers::{create_test_world, line_network, spawn_vehicle};

    #[test]
    fn idle_vehicles_enter_the_index_and_busy_ones_leave() {
        let network = Arc::new(line_network(3));
        let mut world = create_test_world(network, DispatchConfig::default());
        let entity = spawn_vehicle(&mut world, 3, LinkId(0), 4);

        let mut schedule = EcsSchedule::default();
        schedule.add_systems(update_zone_index_system);
        schedule.run(&mut world);

        let zone = world
            .resource::<ZonalIndex>()
            .zone_of(LinkId(0))
            .expect("zone");
        assert_eq!(world.resource::<ZonalIndex>().idle_count(zone), 1);

        world
            .get_mut::<Schedule>(entity)
            .expect("schedule")
            .push(Task::planned(0, 10_000, TaskKind::Drive { to: LinkId(2) }))
            .expect("push");
        schedule.run(&mut world);
        assert_eq!(world.resource::<ZonalIndex>().idle_count(zone), 0);
        assert_eq!(
            world.resource::<ZonalIndex>().idle_zone_of(VehicleId(3)),
            None
        );
    }
}
