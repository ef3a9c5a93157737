//! Lucid Library
//!
//! Core modules for the Lucid explanation daemon: consent, rate limits,
//! response cache, provider fallback and the local IPC boundary.

pub mod audit;
pub mod cache;
pub mod config;
pub mod consent;
pub mod core;
pub mod error;
pub mod ipc;
pub mod orchestrator;
pub mod persistence;
pub mod providers;
pub mod rate_limit;
