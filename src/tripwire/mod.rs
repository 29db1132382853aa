//! Run provenance: JSONL event log and BLAKE3 state fingerprints.

pub mod eventlog;
pub mod hasher;
