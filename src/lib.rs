//! Double-booking prevention for venues and staff.
//!
//! A booking occupies one interval on a set of resources (a venue plus any
//! assigned people). [`engine::Engine::reserve`] commits it only when no
//! participating booking overlaps it on any shared resource.

pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
