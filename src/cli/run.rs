// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Run command - execute the pipeline

use colored::Colorize;
use indicatif::ProgressBar;
use miette::Result;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{clients_for, load_config, plan, seeded_cluster, Backend};
use crate::errors::RecoverySuggestion;
use crate::pipeline::{
    EventSink, ExecutionOptions, ExecutionReport, PipelineExecutor, PipelineValidator, StepEvent,
    StepGraph, StepOutcome, StepState, TracingSink,
};
use crate::utils::{create_spinner, hidden_spinner, should_use_colors};

/// Flags of `stepflow run` that override the configuration file
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub dry_run: bool,
    pub targets: Vec<String>,
    pub concurrency: Option<usize>,
    pub fail_fast: bool,
}

/// Prints dry-run previews and keeps the spinner on the running step
struct ConsoleSink {
    progress: ProgressBar,
}

impl ConsoleSink {
    fn line(&self, text: String) {
        if self.progress.is_hidden() {
            println!("{}", text);
        } else {
            self.progress.println(text);
        }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: StepEvent) {
        if let StepEvent::Transition {
            step,
            state: StepState::Execute,
        } = &event
        {
            self.progress.set_message(format!("Running {}", step));
        }

        match event {
            StepEvent::Preview { step, content } => {
                self.line(format!("{} {}\n{}", "would apply".cyan(), step.bold(), content));
            }
            other => TracingSink.emit(other),
        }
    }
}

/// Run the pipeline
pub async fn run(
    config_path: &Path,
    overrides: RunOverrides,
    backend: Backend,
    cancel: CancellationToken,
    verbose: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;

    let execution = &mut config.execution;
    execution.dry_run |= overrides.dry_run;
    execution.fail_fast |= overrides.fail_fast;
    if !overrides.targets.is_empty() {
        execution.targets = overrides.targets;
    }
    if let Some(concurrency) = overrides.concurrency {
        if concurrency == 0 {
            return Err(miette::miette!("--concurrency must be at least 1"));
        }
        execution.concurrency = concurrency;
    }

    let cluster = Arc::new(seeded_cluster(&config));
    let clients = clients_for(backend, cluster.clone())?;
    let plan = plan(&config, &clients)?;

    // Validate pipeline
    let validation = PipelineValidator::validate(&plan.steps, &config.execution.targets);

    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    let graph = StepGraph::build(plan.steps);
    let options = ExecutionOptions::from(&config.execution);

    let progress = if should_use_colors() {
        create_spinner("Running pipeline...")
    } else {
        hidden_spinner()
    };
    let sink = Arc::new(ConsoleSink {
        progress: progress.clone(),
    });

    let executor = PipelineExecutor::new(plan.parameters).with_events(sink);
    let result = executor.execute(&graph, &options, &cancel).await;
    progress.finish_and_clear();
    let report = result?;

    print_report(&report, verbose);

    if report.cancelled {
        return Err(miette::miette!("Pipeline run was cancelled"));
    }

    if !report.failures.is_empty() {
        eprintln!();
        for failure in &report.failures {
            eprintln!("{}", format!("Step '{}' failed:", failure.step).red().bold());
            eprintln!("  {}", failure.message.dimmed());
            if !failure.blocked.is_empty() {
                eprintln!("  blocked: {}", failure.blocked.join(", "));
            }
            for suggestion in RecoverySuggestion::for_error(&failure.clone().into_error()) {
                eprint!("  {}", suggestion.format());
            }
        }
        return Err(miette::miette!(
            "Pipeline execution failed: {} step(s) failed",
            report.failures.len()
        ));
    }

    if !cluster.tests_run().is_empty() {
        println!();
        println!("{}:", "Tests".bold());
        for job in cluster.tests_run() {
            println!("  - {} ({})", job.name, job.image);
        }
    }

    Ok(())
}

fn print_report(report: &ExecutionReport, verbose: bool) {
    println!();
    for (name, outcome) in &report.outcomes {
        match outcome {
            StepOutcome::Succeeded => println!("  {} {}", "✓".green(), name),
            StepOutcome::AlreadyDone => {
                println!("  {} {} {}", "✓".green(), name, "(already done)".dimmed())
            }
            StepOutcome::Failed(_) => println!("  {} {}", "✗".red(), name),
            StepOutcome::Blocked { by } => println!(
                "  {} {} {}",
                "○".yellow(),
                name,
                format!("(blocked by {})", by.join(", ")).dimmed()
            ),
            StepOutcome::Cancelled => println!("  {} {} {}", "○".dimmed(), name, "(cancelled)".dimmed()),
            StepOutcome::NotTargeted if verbose => {
                println!("  {} {}", "-".dimmed(), name.dimmed())
            }
            StepOutcome::NotTargeted => {}
        }
    }
    println!();
    println!(
        "{} in {:.2?}",
        if report.success() {
            "Pipeline finished".green().bold()
        } else {
            "Pipeline stopped".red().bold()
        },
        report.duration
    );
}
