//! Cached data access over a relational store.
//!
//! Rows are cached per record with field tracking, relation links and query
//! results are cached as identifiers only, and every committed write cascades
//! invalidation across the tiers that might depend on it.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
