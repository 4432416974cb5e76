//! Function-level coverage instrumentation for Rust sources.
//!
//! The instrumenter parses each file of a compilation unit, records every
//! function that has a body, and splices a counter update into the start of
//! each one. The file holding `main` additionally receives a generated module
//! that owns the counters and writes them to a coverage file when the program
//! leaves `main` (and, optionally, on a fixed period).

pub mod config;
pub mod error;
pub mod fragment;
pub mod instrument;
pub mod manifest;
pub mod normalize;
pub mod output;
pub mod scan;
pub mod splice;
