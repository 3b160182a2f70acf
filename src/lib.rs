//! Incremental dependency-graph maintainer for a time-series database.
//!
//! A notification-driven daemon keeps the persisted set of (time series,
//! computation) dependency edges equal to what a from-scratch evaluation
//! would produce: it expands group definitions (set algebra over
//! identifiers, cycle-safe), matches computation input parameters against
//! the identifier catalog, and reconciles results into the dependency table
//! through a staging scratchpad — all under a heartbeat-verified process
//! lock so at most one instance runs per application identity.

pub mod cache;
#[cfg(feature = "cli")]
pub mod cli_app;
pub mod config;
pub mod core;
pub mod daemon;
pub mod dao;
pub mod expander;
pub mod lock;
pub mod model;
pub mod reconciler;
