//! Core domain types: work items, stage traits, jobs and execution context.

pub mod context;
pub mod item;
pub mod job;
pub mod task;
pub mod types;
