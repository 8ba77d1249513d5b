//! Zonal index: square-cell partition of the network used to bound candidate
//! search. Zones are a derived structure, rebuildable at any time; they own
//! no vehicles or requests. The index keeps incremental registries of idle
//! vehicles and pending requests per zone, with reverse maps for cheap
//! updates, and a compare-and-swap activation flag per zone so readers can
//! recompute demand/supply balance only where something changed.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bevy_ecs::prelude::Resource;

use crate::ecs::VehicleId;
use crate::network::{LinkId, Network};
use crate::registry::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneId(pub u32);

#[derive(Debug, Clone, Copy)]
pub struct Zone {
    pub id: ZoneId,
    pub centroid: (f64, f64),
}

#[derive(Resource)]
pub struct ZonalIndex {
    network: Arc<Network>,
    cell_size_m: f64,
    origin: (f64, f64),
    cols: u32,
    rows: u32,
    zone_of_link: HashMap<LinkId, ZoneId>,
    idle_by_zone: HashMap<ZoneId, BTreeSet<VehicleId>>,
    idle_zone_of: HashMap<VehicleId, ZoneId>,
    pending_by_zone: HashMap<ZoneId, BTreeSet<RequestId>>,
    pending_zone_of: HashMap<RequestId, ZoneId>,
    activation: Vec<AtomicBool>,
}

impl ZonalIndex {
    pub fn new(network: Arc<Network>, cell_size_m: f64) -> Self {
        let cell_size_m = if cell_size_m > 0.0 { cell_size_m } else { 1.0 };
        let (min_x, min_y, max_x, max_y) = network.bounds().unwrap_or((0.0, 0.0, 0.0, 0.0));
        let cols = (((max_x - min_x) / cell_size_m).floor() as u32) + 1;
        let rows = (((max_y - min_y) / cell_size_m).floor() as u32) + 1;
        let mut index = Self {
            network,
            cell_size_m,
            origin: (min_x, min_y),
            cols,
            rows,
            zone_of_link: HashMap::new(),
            idle_by_zone: HashMap::new(),
            idle_zone_of: HashMap::new(),
            pending_by_zone: HashMap::new(),
            pending_zone_of: HashMap::new(),
            activation: (0..cols as usize * rows as usize)
                .map(|_| AtomicBool::new(false))
                .collect(),
        };
        index.rebuild();
        index
    }

    /// Recomputes the link → zone mapping from the network topology.
    /// Registries survive a rebuild only for links that still exist.
    pub fn rebuild(&mut self) {
        self.zone_of_link.clear();
        let network = self.network.clone();
        for link in network.links() {
            if let Some((x, y)) = network.link_coord(link.id) {
                let zone = self.zone_at(x, y);
                self.zone_of_link.insert(link.id, zone);
            }
        }
    }

    fn zone_at(&self, x: f64, y: f64) -> ZoneId {
        let col = (((x - self.origin.0) / self.cell_size_m).floor().max(0.0) as u32).min(self.cols - 1);
        let row = (((y - self.origin.1) / self.cell_size_m).floor().max(0.0) as u32).min(self.rows - 1);
        ZoneId(row * self.cols + col)
    }

    pub fn zone_of(&self, link: LinkId) -> Option<ZoneId> {
        self.zone_of_link.get(&link).copied()
    }

    pub fn zone(&self, id: ZoneId) -> Zone {
        Zone {
            id,
            centroid: self.centroid(id),
        }
    }

    pub fn zone_count(&self) -> usize {
        (self.cols * self.rows) as usize
    }

    fn centroid(&self, id: ZoneId) -> (f64, f64) {
        let col = id.0 % self.cols;
        let row = id.0 / self.cols;
        (
            self.origin.0 + (col as f64 + 0.5) * self.cell_size_m,
            self.origin.1 + (row as f64 + 0.5) * self.cell_size_m,
        )
    }

    fn zone_distance_m(&self, a: ZoneId, b: ZoneId) -> f64 {
        let (ax, ay) = self.centroid(a);
        let (bx, by) = self.centroid(b);
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    fn max_extent_m(&self) -> f64 {
        self.cell_size_m * (self.cols.max(self.rows) as f64 + 1.0)
    }

    /// Flags a zone whose supply/demand changed. Lock-free single-writer CAS;
    /// returns whether this call was the one that activated it.
    fn mark_active(&self, zone: ZoneId) -> bool {
        self.activation
            .get(zone.0 as usize)
            .map(|flag| {
                flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Drains and returns all zones activated since the last drain.
    pub fn drain_active(&self) -> Vec<ZoneId> {
        self.activation
            .iter()
            .enumerate()
            .filter(|(_, flag)| flag.swap(false, Ordering::AcqRel))
            .map(|(i, _)| ZoneId(i as u32))
            .collect()
    }

    pub fn insert_idle_vehicle(&mut self, vehicle: VehicleId, at: LinkId) {
        let Some(zone) = self.zone_of(at) else {
            return;
        };
        if self.idle_zone_of.get(&vehicle) == Some(&zone) {
            return;
        }
        self.remove_idle_vehicle(vehicle);
        self.idle_by_zone.entry(zone).or_default().insert(vehicle);
        self.idle_zone_of.insert(vehicle, zone);
        self.mark_active(zone);
    }

    pub fn remove_idle_vehicle(&mut self, vehicle: VehicleId) {
        if let Some(zone) = self.idle_zone_of.remove(&vehicle) {
            if let Some(set) = self.idle_by_zone.get_mut(&zone) {
                set.remove(&vehicle);
                if set.is_empty() {
                    self.idle_by_zone.remove(&zone);
                }
            }
            self.mark_active(zone);
        }
    }

    pub fn insert_pending_request(&mut self, request: RequestId, origin: LinkId) {
        let Some(zone) = self.zone_of(origin) else {
            return;
        };
        self.remove_pending_request(request);
        self.pending_by_zone.entry(zone).or_default().insert(request);
        self.pending_zone_of.insert(request, zone);
        self.mark_active(zone);
    }

    pub fn remove_pending_request(&mut self, request: RequestId) {
        if let Some(zone) = self.pending_zone_of.remove(&request) {
            if let Some(set) = self.pending_by_zone.get_mut(&zone) {
                set.remove(&request);
                if set.is_empty() {
                    self.pending_by_zone.remove(&zone);
                }
            }
            self.mark_active(zone);
        }
    }

    pub fn idle_count(&self, zone: ZoneId) -> usize {
        self.idle_by_zone.get(&zone).map_or(0, BTreeSet::len)
    }

    pub fn idle_zone_of(&self, vehicle: VehicleId) -> Option<ZoneId> {
        self.idle_zone_of.get(&vehicle).copied()
    }

    pub fn pending_count(&self, zone: ZoneId) -> usize {
        self.pending_by_zone.get(&zone).map_or(0, BTreeSet::len)
    }

    /// Pending minus idle: positive means the zone is under-supplied.
    pub fn imbalance(&self, zone: ZoneId) -> i64 {
        self.pending_count(zone) as i64 - self.idle_count(zone) as i64
    }

    /// Nearest idle vehicles around `zone`, nearest zone first, ties by
    /// ascending vehicle id. The search radius grows by `expansion_m` while
    /// fewer than `limit` candidates are in range, capped at the whole
    /// network. Returns an empty vec when no idle vehicle exists at all.
    pub fn nearby_vehicles(
        &self,
        zone: ZoneId,
        expansion_m: f64,
        limit: usize,
    ) -> Vec<VehicleId> {
        self.nearby(&self.idle_by_zone, zone, expansion_m, limit)
    }

    /// Nearest pending requests around `zone`; same contract as
    /// [`Self::nearby_vehicles`].
    pub fn nearby_requests(
        &self,
        zone: ZoneId,
        expansion_m: f64,
        limit: usize,
    ) -> Vec<RequestId> {
        self.nearby(&self.pending_by_zone, zone, expansion_m, limit)
    }

    fn nearby<T: Copy + Ord>(
        &self,
        registry: &HashMap<ZoneId, BTreeSet<T>>,
        zone: ZoneId,
        expansion_m: f64,
        limit: usize,
    ) -> Vec<T> {
        if limit == 0 {
            return Vec::new();
        }
        let mut buckets: Vec<(u64, ZoneId)> = registry
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(z, _)| (self.zone_distance_m(zone, *z).round() as u64, *z))
            .collect();
        buckets.sort_unstable();

        let step = if expansion_m > 0.0 {
            expansion_m
        } else {
            self.max_extent_m()
        };
        let mut radius = self.cell_size_m;
        loop {
            let in_range: usize = buckets
                .iter()
                .take_while(|(dist, _)| (*dist as f64) <= radius)
                .map(|(_, z)| registry.get(z).map_or(0, BTreeSet::len))
                .sum();
            if in_range >= limit || radius >= self.max_extent_m() {
                break;
            }
            radius += step;
        }

        let mut result = Vec::with_capacity(limit);
        for (dist, z) in &buckets {
            if (*dist as f64) > radius {
                break;
            }
            if let Some(set) = registry.get(z) {
                for item in set {
                    result.push(*item);
                    if result.len() == limit {
                        return result;
                    }
                }
            }
        }
        result
    }
}

/// Demand/supply balance snapshot read by the goal functions. Refreshed
/// incrementally from the zones the index flagged as active, so a dispatch
/// pass recomputes only what changed since the previous pass.
#[derive(Debug, Default, Resource)]
pub struct ZoneBalance {
    by_zone: HashMap<ZoneId, i64>,
}

impl ZoneBalance {
    pub fn refresh_from(&mut self, index: &ZonalIndex) {
        for zone in index.drain_active() {
            let imbalance = index.imbalance(zone);
            if imbalance == 0 {
                self.by_zone.remove(&zone);
            } else {
                self.by_zone.insert(zone, imbalance);
            }
        }
    }

    pub fn imbalance(&self, zone: ZoneId) -> i64 {
        self.by_zone.get(&zone).copied().unwrap_or(0)
    }
}
