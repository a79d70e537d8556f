//! Forward-looking flexibility-state engine for EV charger fleets.
//!
//! Tracks, per tariff subscription, the energy still owed to a population of
//! plugged-in vehicles over a rolling horizon of hourly timeslots. Each
//! timeslot the surrounding market code runs the five-phase protocol
//! (regulation, collapse, rebalance, demand, usage) on a [`StorageState`]
//! and reads the consumption bounds it may trade against.

pub mod codec;
pub mod config;
pub mod demand;
pub mod element;
/// Ring buffer holding the forward horizon of commitment cells.
pub mod ring;
pub mod state;
pub mod subscription;
/// CSV export of per-timeslot flexibility bounds.
pub mod telemetry;

pub use config::EngineConfig;
pub use demand::DemandElement;
pub use element::StorageElement;
pub use ring::RingHorizon;
pub use state::DemandBounds;
pub use state::StorageState;
pub use subscription::StaticSubscription;
pub use subscription::Subscription;

/// Tolerance for floating-point equality comparisons.
pub const EQ_TOLERANCE: f64 = 1e-6;

/// Tolerance below which a physical quantity (kWh, vehicles) counts as zero.
pub const PHYS_TOLERANCE: f64 = 1e-3;
