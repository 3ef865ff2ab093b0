//! Stepstack — a scheduled serverless workflow as code.
//!
//! Declares a compute function, a state machine that invokes it with bounded
//! retry, and a cron rule that starts the state machine, each behind a
//! least-privilege role. Deferred attribute values thread the resources
//! together; BLAKE3 state hashing and provenance tracing track what converged.

pub mod cli;
pub mod core;
pub mod function;
pub mod provider;
pub mod resources;
pub mod stack;
pub mod transport;
pub mod tripwire;
