//! Perpetua Trading Core Library
//!
//! Core components for the Perpetua unattended perpetual-futures trading
//! system on Hyperliquid: exchange protocol client, order execution,
//! indicator engine, per-user trading locks, and the cycle orchestrator.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod scheduler;
