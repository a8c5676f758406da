//! Runtime: the `ingest` binary: CLI, boot sequence and job loop.

pub mod boot;
pub mod cli;
pub mod run;
