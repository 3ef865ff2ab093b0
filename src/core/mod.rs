//! Core engine — types, parsing, deferred values, resolution, planning, execution.

pub mod cron;
pub mod executor;
pub mod output;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod types;
