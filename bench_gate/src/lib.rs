pub mod cli;
pub mod commit;
pub mod config;
pub mod data;
pub mod defaults;
pub mod evaluate;
pub mod evaluation_config;
pub mod ingest;
pub mod stats;
pub mod store;
pub mod strategies;
pub mod summary;
pub mod verdict;

// Test helpers module - made public for use in unit tests, integration tests, and benchmarks
// This is conditionally compiled to avoid including test code in release builds
#[doc(hidden)]
#[cfg(any(test, doctest, feature = "test-helpers"))]
pub mod test_helpers;
