//! Vessel tracking: the hashed-LRU vessel database, message/position
//! duplicate suppression, rolling statistics histograms, and the binary
//! snapshot format that ties them together.
//!
//! Grounded on `Tracking/PlaneDB.h` (hash-chained doubly-linked-list LRU,
//! generalized here from planes to vessels), `Source/Marine/MessageHistory.h`
//! (the expanding circular duplicate-suppression ring), `Source/Tracking/
//! Statistics.h` and `Source/Tracking/History.h` (per-interval histograms).

pub mod db;
pub mod dedup;
pub mod history;
pub mod persist;
pub mod stats;
pub mod vessel;

pub use db::VesselDb;
pub use vessel::Vessel;
