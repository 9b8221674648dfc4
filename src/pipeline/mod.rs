// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! The step-graph engine
//!
//! Links, the step contract, graph construction and ordering, parameter
//! propagation and the execution driver.

mod dag;
mod definition;
mod executor;
mod link;
mod parameters;
mod step;
#[cfg(test)]
pub(crate) mod testing;
mod validation;

pub use dag::{print_digraph, NodeId, StepGraph, StepNode};
pub use definition::*;
pub use executor::{
    execute, ExecutionOptions, ExecutionReport, FailurePolicy, PipelineExecutor, StepFailure,
    StepOutcome,
};
pub use link::{has_all_links, has_any_link, link_names, StepLink};
pub use parameters::{OverrideParameters, ParameterMap, ParameterSource, Parameters, Resolver};
pub use step::{
    EventSink, InputDefinition, RecordingSink, Step, StepContext, StepEvent, StepState,
    TracingSink,
};
pub use validation::{PipelineValidator, ValidationResult};
