//! Planar road network plus the two consumed routing interfaces:
//!
//! - **TravelEstimator**: pure `(from, to, time) -> (duration, distance)`
//!   estimate used by insertion cost evaluation.
//! - **RouteOracle**: `next_link` decision point used by the movement system,
//!   one hop per node; `None` means the route is lost.
//!
//! Both are stored as `Box<dyn ...>` ECS resources so backends can be swapped
//! during scenario building. Defaults: beeline estimate over a constant speed,
//! Dijkstra shortest paths over the link graph with an LRU path cache.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use bevy_ecs::prelude::Resource;
use lru::LruCache;
use pathfinding::prelude::dijkstra;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Node {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub id: LinkId,
    pub from: NodeId,
    pub to: NodeId,
    pub length_m: f64,
    pub freespeed_m_s: f64,
}

impl Link {
    /// Free-flow traversal time of this link in simulation ms.
    pub fn traversal_ms(&self) -> u64 {
        if self.length_m <= 0.0 {
            return 0;
        }
        (self.length_m / self.freespeed_m_s.max(0.1) * 1000.0).round() as u64
    }
}

/// Directed link/node graph with planar coordinates. Built once per scenario;
/// shared via `Arc` between the zonal index, estimator, and routing oracle.
#[derive(Debug, Default)]
pub struct Network {
    nodes: BTreeMap<NodeId, Node>,
    links: BTreeMap<LinkId, Link>,
    outgoing: HashMap<NodeId, Vec<LinkId>>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId, x: f64, y: f64) {
        self.nodes.insert(id, Node { id, x, y });
    }

    pub fn add_link(&mut self, id: LinkId, from: NodeId, to: NodeId, length_m: f64, freespeed_m_s: f64) {
        debug_assert!(self.nodes.contains_key(&from), "unknown from node");
        debug_assert!(self.nodes.contains_key(&to), "unknown to node");
        self.links.insert(
            id,
            Link {
                id,
                from,
                to,
                length_m,
                freespeed_m_s,
            },
        );
        let out = self.outgoing.entry(from).or_default();
        out.push(id);
        // Sorted outgoing links keep path searches deterministic.
        out.sort_unstable();
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn outgoing(&self, node: NodeId) -> &[LinkId] {
        self.outgoing.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Coordinate a link is addressed by: its downstream (to) node.
    pub fn link_coord(&self, id: LinkId) -> Option<(f64, f64)> {
        let link = self.links.get(&id)?;
        let node = self.nodes.get(&link.to)?;
        Some((node.x, node.y))
    }

    pub fn beeline_m(&self, from: LinkId, to: LinkId) -> Option<f64> {
        let (ax, ay) = self.link_coord(from)?;
        let (bx, by) = self.link_coord(to)?;
        Some(((ax - bx).powi(2) + (ay - by).powi(2)).sqrt())
    }

    /// Bounding box over node coordinates: `(min_x, min_y, max_x, max_y)`.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut nodes = self.nodes.values();
        let first = nodes.next()?;
        let mut bounds = (first.x, first.y, first.x, first.y);
        for node in nodes {
            bounds.0 = bounds.0.min(node.x);
            bounds.1 = bounds.1.min(node.y);
            bounds.2 = bounds.2.max(node.x);
            bounds.3 = bounds.3.max(node.y);
        }
        Some(bounds)
    }
}

/// Shared read-only network handle.
#[derive(Resource, Clone)]
pub struct NetworkResource(pub Arc<Network>);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelEstimate {
    pub duration_ms: u64,
    pub distance_m: f64,
}

pub trait TravelEstimator: Send + Sync {
    fn estimate(&self, from: LinkId, to: LinkId, at_ms: u64) -> TravelEstimate;
}

#[derive(Resource)]
pub struct TravelEstimatorResource(pub Box<dyn TravelEstimator>);

/// Beeline distance over a constant speed. Deterministic and time-independent,
/// so estimates are cached per link pair.
pub struct BeelineEstimator {
    network: Arc<Network>,
    speed_m_s: f64,
    cache: Mutex<LruCache<(LinkId, LinkId), TravelEstimate>>,
}

impl BeelineEstimator {
    pub fn new(network: Arc<Network>, speed_m_s: f64) -> Self {
        Self {
            network,
            speed_m_s,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(50_000).expect("cache size must be non-zero"),
            )),
        }
    }

    fn compute(&self, from: LinkId, to: LinkId) -> TravelEstimate {
        let distance_m = self.network.beeline_m(from, to).unwrap_or(0.0);
        let duration_ms = if distance_m <= 0.0 {
            0
        } else {
            (distance_m / self.speed_m_s.max(0.1) * 1000.0).round() as u64
        };
        TravelEstimate {
            duration_ms,
            distance_m,
        }
    }
}

impl TravelEstimator for BeelineEstimator {
    fn estimate(&self, from: LinkId, to: LinkId, _at_ms: u64) -> TravelEstimate {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(_) => return self.compute(from, to),
        };
        *cache.get_or_insert((from, to), || self.compute(from, to))
    }
}

/// Raised (as a diagnostic) when no outgoing link continues the planned route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("route lost: no way from {from} toward {to}")]
pub struct RouteLost {
    pub from: LinkId,
    pub to: LinkId,
}

pub trait RouteOracle: Send + Sync {
    /// Next link along the route from `current` toward `destination`.
    /// `None` when no route exists; callers must treat that as [`RouteLost`].
    fn next_link(&self, current: LinkId, destination: LinkId) -> Option<LinkId>;
}

#[derive(Resource)]
pub struct RouteOracleResource(pub Box<dyn RouteOracle>);

/// Dijkstra over the link graph, cost = link length in mm to stay integral.
/// Successful link paths are cached; failures are not (retry is fine).
pub struct ShortestPathOracle {
    network: Arc<Network>,
    cache: Mutex<LruCache<(LinkId, LinkId), Vec<LinkId>>>,
}

impl ShortestPathOracle {
    pub fn new(network: Arc<Network>) -> Self {
        Self {
            network,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(5_000).expect("cache size must be non-zero"),
            )),
        }
    }

    fn compute_path(&self, from: LinkId, to: LinkId) -> Option<Vec<LinkId>> {
        let network = &self.network;
        let (path, _cost) = dijkstra(
            &from,
            |link_id| {
                let successors: Vec<(LinkId, u64)> = network
                    .link(*link_id)
                    .map(|link| {
                        network
                            .outgoing(link.to)
                            .iter()
                            .filter_map(|next_id| {
                                let next = network.link(*next_id)?;
                                Some((*next_id, (next.length_m * 1000.0).round() as u64))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                successors
            },
            |link_id| *link_id == to,
        )?;
        Some(path)
    }

    fn path(&self, from: LinkId, to: LinkId) -> Option<Vec<LinkId>> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(_) => return self.compute_path(from, to),
        };
        if let Some(cached) = cache.get(&(from, to)) {
            return Some(cached.clone());
        }
        let path = self.compute_path(from, to);
        if let Some(links) = &path {
            cache.put((from, to), links.clone());
        }
        path
    }
}

impl RouteOracle for ShortestPathOracle {
    fn next_link(&self, current: LinkId, destination: LinkId) -> Option<LinkId> {
        if current == destination {
            return Some(current);
        }
        let path = self.path(current, destination)?;
        path.get(1).copied()
    }
}
