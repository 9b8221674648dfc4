// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Graph command - show the step graph

use miette::{IntoDiagnostic, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use super::{load_config, plan, seeded_cluster, GraphFormat};
use crate::clients::Clients;
use crate::pipeline::{print_digraph, StepGraph};

/// Print the step graph of the configured pipeline
pub async fn run(config_path: &Path, format: GraphFormat) -> Result<()> {
    let config = load_config(config_path)?;
    let clients = Clients::memory(Arc::new(seeded_cluster(&config)));
    let plan = plan(&config, &clients)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match format {
        GraphFormat::Digraph => print_digraph(&mut out, &plan.steps).into_diagnostic()?,
        GraphFormat::Text => {
            let graph = StepGraph::build(plan.steps);
            write!(out, "{}", graph.to_text()?).into_diagnostic()?;
        }
        GraphFormat::Dot => {
            write!(out, "{}", StepGraph::build(plan.steps).to_dot()).into_diagnostic()?
        }
        GraphFormat::Mermaid => {
            write!(out, "{}", StepGraph::build(plan.steps).to_mermaid()).into_diagnostic()?
        }
    }

    Ok(())
}
