//! # skiff-core
//!
//! In-memory compilation and deadline-bounded execution of untrusted
//! programs.
//!
//! A request is an ordered list of named source units. It goes through two
//! phases, each recorded in a [`ResultRecord`]:
//! - compile: a backend turns the units into a loaded program and resolves
//!   the entry point
//! - execute: a fresh worker thread runs the entry point under a hard
//!   deadline while both console channels are captured
//!
//! Nothing in either phase fails the caller. Compile errors, crashes and
//! timeouts all end up as fields of the record.

#![allow(clippy::module_name_repetitions)]

pub mod capture;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod lang;
pub mod lifecycle;
pub mod permission;
pub mod result;
pub mod sandbox;
pub mod source;
pub mod vm;
pub mod worker;

pub use compiler::{CompiledArtifact, Compiler};
pub use config::{BackendSelector, RunConfig, SandboxMode};
pub use engine::Engine;
pub use error::SkiffError;
pub use lifecycle::{Request, RequestState};
pub use permission::{Capability, PermissionSet};
pub use result::ResultRecord;
pub use source::SourceUnit;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, SkiffError>;

/// Compile phase on its own: a fresh record and the artifact, if any
pub fn compile(units: &[SourceUnit], config: &RunConfig) -> (ResultRecord, Option<CompiledArtifact>) {
    let mut record = ResultRecord::received();
    let artifact = Compiler::compile(units, config, &mut record);
    (record, artifact)
}

/// Execute phase on its own, continuing the record from [`compile`]
pub fn execute(
    mut record: ResultRecord,
    artifact: Option<CompiledArtifact>,
    permissions: &PermissionSet,
    config: &RunConfig,
) -> ResultRecord {
    Engine::execute(&mut record, artifact, permissions, config);
    record
}

/// Both phases, with `returned` stamped on the way out
pub fn run(units: &[SourceUnit], config: &RunConfig, permissions: &PermissionSet) -> ResultRecord {
    let (record, artifact) = compile(units, config);
    let mut record = execute(record, artifact, permissions, config);
    record.mark_returned();
    record
}
