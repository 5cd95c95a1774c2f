#![allow(dead_code)]

pub mod app;
pub mod fake_upstream;
pub mod test_metrics;
