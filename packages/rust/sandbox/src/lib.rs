//! Sandboxed execution of generated shell commands and scripts.
//!
//! This crate provides:
//! - [`policy`]: Lexical deny-lists for commands and script imports
//! - [`executor`]: [`Sandbox`], which runs vetted code in a throwaway
//!   directory and its own process group under a timeout
//!
//! The deny-lists and the script runner's trimmed builtins only catch obvious
//! mistakes and abuse. Containment comes from the subprocess boundary: a
//! per-run temp dir, SIGTERM then SIGKILL to the whole process group on
//! timeout, and capped output capture.

pub mod executor;
pub mod policy;

pub use executor::{ExecutionResult, Sandbox};
pub use policy::{CommandLimits, DENIED_MODULES, PolicyViolation, vet_command, vet_imports};
