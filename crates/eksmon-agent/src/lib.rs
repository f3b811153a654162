//! The eksmon monitoring process: configuration, logging, the per-cycle
//! report and the poll loop that ties the cloud, alert and notify crates
//! together.

pub mod config;
pub mod logging;
pub mod monitor;
pub mod report;
