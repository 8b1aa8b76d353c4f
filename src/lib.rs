//! gradebox: grades a code submission against hidden instructor tests
//!
//! A run copies the submission and the private tests into an ephemeral
//! workspace, builds every helper and test binary, runs each test package
//! (plain, race-instrumented, benchmarks) under a controlled environment,
//! compares benchmarks against the reference solution, enforces statement
//! coverage and finally consults a linter.
//!
//! # Architecture
//!
//! ## Pipeline ([`pipeline`])
//! - [`pipeline::Pipeline`]: fail-fast stage sequencing, resource ownership
//!
//! ## Workspace ([`overlay`], [`safety`])
//! - [`overlay`]: overlay layers and the copying materializer
//! - [`safety::workspace`]: run-scoped workspace and binary cache
//! - [`safety::safe_cleanup`]: no-follow tree removal
//!
//! ## Build ([`build`], [`toolchain`])
//! - [`build::ArtifactBuilder`]: helper and test binaries per package
//! - [`build::registry`]: helper binary registry handed to children
//! - [`toolchain`]: toolchain and lint collaborators
//!
//! ## Execution ([`exec`], [`kernel`])
//! - [`exec::executor`]: direct execution and strategy selection
//! - [`exec::isolated`]: privilege-attenuated execution
//! - [`exec::env`]: minimal child environment
//! - [`kernel::namespace`], [`kernel::credentials`]: pre-exec primitives
//!
//! ## Analysis ([`coverage`], [`bench`])
//! - [`coverage`]: profile merge and threshold check
//! - [`bench`]: benchmark parsing and regression rule
//!
//! ## Configuration ([`config`])
//! - [`config::loader`]: JSON configuration with defaults
//! - [`config::validator`]: fail-fast configuration checks
//! - [`config::types`]: errors, stages, verdicts, reports
//!
//! # Design Principles
//!
//! 1. **Copy, never alias** - submission code cannot reach grading assets
//! 2. **One owner per resource** - run directories are released on every path
//! 3. **Verdicts are not errors** - a broken grader never looks like a bad submission
//! 4. **Minimal unsafe** - confined to [`kernel`] and the pre-exec hook

// Pipeline
pub mod pipeline;

// Workspace
pub mod overlay;
pub mod safety;

// Build
pub mod build;
pub mod toolchain;

// Execution
pub mod exec;
pub mod kernel;

// Analysis
pub mod bench;
pub mod coverage;

// Configuration
pub mod config;

// CLI
pub mod cli;

pub use build::registry::BinaryRegistry;
pub use config::loader::GraderConfig;
pub use config::types::{GradeError, PipelineResult, Result, Stage, SubmissionFailure, Verdict};
pub use pipeline::{Collaborators, GradeRequest, Pipeline};
