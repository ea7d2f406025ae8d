//! Integration tests for progressive loading and filtering

mod filter_scenarios;
mod loader_scenarios;
mod support;
