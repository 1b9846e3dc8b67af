//! Application Layer
//!
//! Orchestration of the trading cycle and the position reconciler. The
//! decision provider and market-data source are trait seams so the cycle
//! runs against mocks in tests.

pub mod decision;
pub mod orchestrator;
pub mod reconciler;
