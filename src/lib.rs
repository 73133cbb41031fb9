//! Turn proxy subscriptions into client configuration lines.
//!
//! [`provider`] fetches and caches subscription feeds and normalizes them
//! into [`node::NodeConfig`] records; [`encode`] renders those records for
//! Surge or Surfboard.

pub mod cache;
pub mod cli;
pub mod config;
pub mod encode;
pub mod node;
pub mod provider;
