// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! stepflow - Step-Graph Pipeline Orchestrator
//!
//! Build, tag and test container images in dependency order.

use clap::Parser;
use miette::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stepflow::cli::run::RunOverrides;
use stepflow::cli::{Cli, Commands};
use stepflow::utils::should_use_colors;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for command output
    let default_filter = if cli.verbose {
        "stepflow=debug"
    } else {
        "stepflow=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if !should_use_colors() {
        colored::control::set_override(false);
    }

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling running steps");
            on_interrupt.cancel();
        }
    });

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            dry_run,
            targets,
            concurrency,
            fail_fast,
            backend,
        } => {
            let overrides = RunOverrides {
                dry_run,
                targets,
                concurrency,
                fail_fast,
            };
            stepflow::cli::run::run(&cli.config, overrides, backend, cancel, cli.verbose).await
        }
        Commands::Validate { targets } => {
            stepflow::cli::validate::run(&cli.config, targets, cli.verbose).await
        }
        Commands::Graph { format } => stepflow::cli::graph::run(&cli.config, format).await,
    }
}
