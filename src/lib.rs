//! ROUNDKEEPER: competition lifecycle and settlement core.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod draft_window;
pub mod engine;
pub mod feed;
pub mod prizes;
pub mod scoring;
pub mod storage;
pub mod types;
