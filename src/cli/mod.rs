//! Operator CLI
//!
//! Thin inspection surface over the library: effective config, chain
//! resolution, cost estimates and URL discovery.

pub mod commands;
