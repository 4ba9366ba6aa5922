//! Full pipeline tests over in-memory ports
//!
//! Run with: cargo test --test pipeline

mod limiting;
mod traffic;
mod workers;
