//! # GitBeam Commit Monitor Library
//!
//! Mirrors the commit history of upstream repositories into a local store,
//! keeps it fresh with per-repository pollers and serves queries over it.

pub mod config;
pub mod connectors;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod mirror;
pub mod models;
pub mod query;
pub mod registry;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod telemetry;
pub use migration;
