//! CASCADE — multi-leg flash-borrow arbitrage engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod oracle;
pub mod strategy;
pub mod generator;
pub mod engine;
pub mod storage;
