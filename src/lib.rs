// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! # stepflow - Step-Graph Pipeline Orchestrator
//!
//! `stepflow` runs multi-stage container build and test pipelines as a graph
//! of steps wired together by what each step requires and creates.
//!
//! ## Features
//!
//! - **Link-based ordering** - Steps declare the artifacts they consume and produce
//! - **Concurrent execution** - Independent steps run in parallel under a bound
//! - **Targets** - Run a step and only what it depends on
//! - **Lazy parameters** - Values like published pull specs resolve once their producer is done
//! - **Dry runs** - Preview every mutation without applying it
//!
//! ## Quick Start
//!
//! ```bash
//! # Show who depends on whom
//! stepflow graph
//!
//! # Preview a run
//! stepflow run --dry-run
//!
//! # Run one test and its prerequisites
//! stepflow run --target e2e-aws
//! ```

pub mod cli;
pub mod clients;
pub mod defaults;
pub mod errors;
pub mod pipeline;
pub mod steps;
pub mod utils;

// Re-export commonly used types
pub use errors::{StepflowError, StepflowResult};
pub use pipeline::{
    execute, ExecutionOptions, ExecutionReport, Parameters, PipelineExecutor, Step, StepContext,
    StepGraph, StepLink,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
