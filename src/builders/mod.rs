//! Builders to construct the rotation stack from configuration.

pub mod stack_builder;

pub use stack_builder::{build_coordinator, build_pool, build_scheduler};
