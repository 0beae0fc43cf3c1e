//! Attendance Engine library crate.
//!
//! Turns raw biometric punch events into per-day attendance records:
//! which organisational shift each punch pair belongs to, how late or
//! early the employee was against it, how many hours count as worked
//! and whether the day is present, half-day or absent.  The pure
//! calculators (`resolver`, `matcher`, `disambiguation`, `lateness`,
//! `segmenter`, `aggregator`) never touch storage; [`engine`] wires them
//! to a [`store::AttendanceStore`] and [`api`] exposes the engine over
//! HTTP via `api::build_router`.

pub mod models;
pub mod error;
pub mod config;
pub mod clock;
pub mod store;
pub mod resolver;
pub mod matcher;
pub mod disambiguation;
pub mod lateness;
pub mod segmenter;
pub mod aggregator;
pub mod engine;
pub mod api;

#[cfg(test)]
pub(crate) mod test_support;
