//! Tripwire: BLAKE3 definition hashing and provenance event log.

pub mod eventlog;
pub mod hasher;
