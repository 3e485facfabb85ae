//! Integration tests for the CASCADE engine.

mod mock_venue;
mod scenarios;
