// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Validate command - check pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::Path;
use std::sync::Arc;

use super::{load_config, plan, seeded_cluster};
use crate::clients::Clients;
use crate::errors::RecoverySuggestion;
use crate::pipeline::{PipelineValidator, StepGraph};
use crate::utils::{print_error, print_info, print_section, print_success, print_warning};

/// Run the validate command
pub async fn run(config_path: &Path, targets: Vec<String>, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            print_error("Failed to load configuration");
            println!();
            return Err(e);
        }
    };
    print_success(&format!("{} is valid", config_path.display()));

    let clients = Clients::memory(Arc::new(seeded_cluster(&config)));
    let plan = plan(&config, &clients)?;
    print_success(&format!("{} steps defaulted from the configuration", plan.steps.len()));

    let mut targets = targets;
    if targets.is_empty() {
        targets = config.execution.targets.clone();
    }
    let validation = PipelineValidator::validate(&plan.steps, &targets);

    if !validation.errors.is_empty() {
        print_section(&"Errors".red().to_string());
        for error in &validation.errors {
            print_error(error);
        }

        if let Err(e) = StepGraph::build(plan.steps.clone()).topological_sort() {
            let suggestions = RecoverySuggestion::for_error(&e);
            if !suggestions.is_empty() {
                print_section("Suggestions");
                for suggestion in suggestions {
                    print!("  {}", suggestion.format());
                }
            }
        }
    }

    if !validation.warnings.is_empty() {
        print_section(&"Warnings".yellow().to_string());
        for warning in &validation.warnings {
            print_warning(warning);
        }
    }

    if verbose && validation.is_valid() {
        print_section("Execution order");
        let graph = StepGraph::build(plan.steps);
        for id in graph.topological_sort()? {
            let step = graph.step(id);
            print_info(&format!("{} {}", step.name(), step.description().dimmed()));
        }
    }

    println!();
    if !validation.is_valid() {
        return Err(miette::miette!(
            "Pipeline has {} error(s)",
            validation.errors.len()
        ));
    }

    println!("{}", "Pipeline is valid!".green().bold());
    Ok(())
}
