//! Tripwire — provenance tracing and BLAKE3 hashing.

pub mod eventlog;
pub mod hasher;
