//! Declarative environment reconciliation engine.
//!
//! Independent configuration units declare the desired state of one facet of
//! a machine (PATH entries, aliases, packages, shell start-up snippets) and
//! the engine plans, applies, and reports on them in dependency order,
//! recording what it did so later runs can detect drift.
//!
//! The public API is organised into layers:
//!
//! - **[`units`]**: the [`Unit`](units::Unit) contract and the concrete unit families
//! - **[`engine`]**: registration, ordering, and the plan/apply/status walks
//! - **[`comparator`]**: snapshots, checksums, apply metadata, and status resolution
//! - **[`contrib`]**: typed contribution namespaces shared between units
//! - **[`state`]**: the key/value store everything is persisted in
//! - **[`config`]**: TOML unit declarations and their validation
//! - **[`commands`]**: top-level subcommand orchestration (`plan`, `apply`, `status`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod comparator;
pub mod config;
pub mod contrib;
pub mod engine;
pub mod error;
pub mod graph;
pub mod logging;
pub mod platform;
pub mod state;
pub mod units;
