//! Caching, delta-sync and invalidation layer for a budgeting REST API.

pub mod app;
pub mod budget;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
