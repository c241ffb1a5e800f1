//! # Record Cache Sample Library
//!
//! This library exposes the sample's modules for integration testing.

pub mod lifecycle;
pub mod model;
pub mod server;
