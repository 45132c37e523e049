// Main library entry point for lift-causal.

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod errors;
pub mod infrastructure;
pub mod logging;
pub mod ports;
