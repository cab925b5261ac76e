//! Benchmark infrastructure for the ostx transaction manager: workload sizes, scratch
//! directories and payload generation.

pub mod config;
pub mod workload;
