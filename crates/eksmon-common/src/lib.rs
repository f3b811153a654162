//! Shared data model for eksmon.
//!
//! Every other crate in the workspace speaks in terms of these types:
//! the cloud crate produces [`types::NodeMetricSample`]s, the alert crate
//! turns them into [`types::AlertEvent`]s and the notify crate delivers them.

pub mod types;
