//! Domain layer - Request types and port definitions
//!
//! This module defines the store port that adapters implement,
//! following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
