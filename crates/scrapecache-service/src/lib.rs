//! Restart resilient metric collection.
//!
//! A [`Collector`](collector::Collector) periodically runs a scraper and persists each result as
//! a snapshot. After a restart, a still valid snapshot is served right away and the collection
//! cadence resumes where it left off. Discovery lookups done by scrapers are memoized with
//! [`CachedInventory`](discovery::CachedInventory).

#[macro_use]
pub mod metrics;

pub mod collector;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod snapshot;
