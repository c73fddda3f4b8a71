//! Macrodash library
//!
//! Exposes the cache, data, refresh, API and CLI modules to the binary and
//! to integration tests.

pub mod api;
pub mod cache;
pub mod cli;
pub mod data;
pub mod refresh;
