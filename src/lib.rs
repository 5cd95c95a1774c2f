//! Push Proxy - a push notification gateway for Apple and Android devices.
//!
//! Accepts canonical notification requests over HTTP, routes each one to the
//! delivery adapter configured for its application type, and answers with a
//! classification the caller can act on: delivered, remove the device
//! token, or failed.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod formatting;
pub mod gateway;
pub mod internal_metrics;
pub mod registry;
pub mod task_manager;
pub mod throttle;

// Re-export core types for convenience
pub use core::*;
