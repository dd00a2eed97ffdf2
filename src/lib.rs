//! Pixsemble Batch Generation Engine
//!
//! This library is the core of pixsemble, a client that fans out many AI
//! image-generation requests in parallel. Prompt templates with `[variable]`
//! placeholders are expanded into a matrix of fully-resolved jobs, executed
//! against a remote provider through a bounded-concurrency worker pool with
//! retries and cooperative cancellation, and the resulting images are
//! packaged into a single store-only ZIP archive for download.

pub mod config;
pub mod models;
pub mod services;
