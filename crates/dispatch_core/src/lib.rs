pub mod clock;
pub mod config;
pub mod dispatch;
pub mod ecs;
pub mod network;
pub mod registry;
pub mod runner;
pub mod scenario;
pub mod schedule;
pub mod systems;
pub mod telemetry;
pub mod zones;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
