//! Storage backend implementations.

pub mod memory;
pub mod redb;
