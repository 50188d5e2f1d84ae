//! SQLite functions for a vulnerability manager's store: schedule
//! arithmetic, severity classification, host list handling, unique resource
//! names and column-renaming table copies.
//!
//! Register everything on a connection with
//! [`functions::register_functions`], or open a [`database::Database`] whose
//! pooled connections come registered.

pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod functions;
pub mod hosts;
pub mod logging;
pub mod migrate;
pub mod recurrence;
pub mod run_status;
pub mod severity;
pub mod severity_cache;
pub mod sort;
pub mod tags;
pub mod timestamp;
pub mod uniquify;
