// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for stepflow.

pub mod graph;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use miette::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clients::{Clients, MemoryCluster, ShellTestClient};
use crate::defaults::{self, PipelinePlan};
use crate::pipeline::{PipelineConfig, PIPELINE_IMAGE_STREAM};

/// Step-graph pipeline orchestrator
///
/// Orders image builds, tags and tests by what they require and create.
#[derive(Parser, Debug)]
#[clap(
    name = "stepflow",
    version,
    about = "Orchestrate multi-stage image build and test pipelines",
    long_about = None,
    after_help = "Examples:\n\
        stepflow graph                        Print producer/consumer edges\n\
        stepflow validate                     Check the pipeline can be ordered\n\
        stepflow run --dry-run                Preview every step\n\
        stepflow run --target e2e-aws         Run one test and what it needs\n\n\
        See 'stepflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Pipeline configuration file (YAML or TOML)
    #[clap(
        short,
        long,
        global = true,
        default_value = "stepflow.yaml",
        env = "STEPFLOW_CONFIG"
    )]
    pub config: PathBuf,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline
    Run {
        /// Validate and preview without mutating anything
        #[clap(long)]
        dry_run: bool,

        /// Run only these steps and what they depend on
        #[clap(short, long = "target", value_name = "NAME")]
        targets: Vec<String>,

        /// Maximum number of steps running at once
        #[clap(short = 'j', long)]
        concurrency: Option<usize>,

        /// Stop scheduling new steps after the first failure
        #[clap(long)]
        fail_fast: bool,

        /// Where steps apply their effects
        #[clap(long, value_enum, default_value_t = Backend::Memory, env = "STEPFLOW_BACKEND")]
        backend: Backend,
    },

    /// Validate the pipeline configuration
    Validate {
        /// Also check these targets exist
        #[clap(short, long = "target", value_name = "NAME")]
        targets: Vec<String>,
    },

    /// Show the pipeline as a graph
    Graph {
        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Digraph)]
        format: GraphFormat,
    },
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// `<consumer> <producer>` per edge
    Digraph,
    /// Execution order with dependencies
    Text,
    Dot,
    Mermaid,
}

/// Backend steps run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// An in-process cluster seeded from the configuration
    Memory,
    /// The in-process cluster, with tests run by the local shell
    Shell,
}

/// Load the configuration file, mapping errors to diagnostics
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    Ok(PipelineConfig::from_file(path)?)
}

/// An in-process cluster holding every external input `config` reads
pub fn seeded_cluster(config: &PipelineConfig) -> MemoryCluster {
    let root = &config.build.build_root;
    let root_namespace = if root.namespace.is_empty() {
        config.job.base_namespace.clone()
    } else {
        root.namespace.clone()
    };
    let root_name = if root.name.is_empty() {
        format!("{}-test-base", config.job.repo)
    } else {
        root.name.clone()
    };

    let mut cluster = MemoryCluster::new().with_tag(
        &root_namespace,
        &root_name,
        &root.tag,
        &format!("sha256:{}-{}", root_name, root.tag),
    );
    for (name, base) in &config.build.base_images {
        cluster = cluster.with_tag(
            &base.namespace,
            &base.name,
            &base.tag,
            &format!("sha256:{}-{}", name, base.tag),
        );
    }
    for test in &config.build.tests {
        if let Some(cluster_test) = &test.cluster {
            let mut profile = BTreeMap::new();
            profile.insert("profile".to_string(), cluster_test.profile.clone());
            cluster = cluster.with_secret(
                &config.job.namespace,
                &format!("{}-cluster-profile", test.name),
                profile,
            );
        }
    }

    tracing::debug!(
        namespace = %config.job.namespace,
        stream = PIPELINE_IMAGE_STREAM,
        "seeded in-memory cluster"
    );
    cluster
}

/// Clients for `backend`, backed by `cluster`
pub fn clients_for(backend: Backend, cluster: Arc<MemoryCluster>) -> Result<Clients> {
    let clients = Clients::memory(cluster);
    match backend {
        Backend::Memory => Ok(clients),
        Backend::Shell => {
            let working_dir = std::env::current_dir()
                .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
            let shell = ShellTestClient::new(working_dir);
            shell.check_available()?;
            Ok(clients.with_tests(Arc::new(shell)))
        }
    }
}

/// Default the configured pipeline into steps
pub fn plan(config: &PipelineConfig, clients: &Clients) -> Result<PipelinePlan> {
    Ok(defaults::from_config(
        &config.build,
        &config.job,
        &config.execution.overrides,
        clients,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ImageClient;

    const CONFIG: &str = r#"
job:
  org: org
  repo: repo
  namespace: ci-op-1
build:
  build_root:
    tag: manual
  base_images:
    os:
      namespace: ocp
      name: base
      tag: "4.1"
  tests:
    - as: e2e-aws
      commands: make e2e
      cluster:
        profile: aws
"#;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::parse_from([
            "stepflow", "run", "--dry-run", "-t", "src", "--target", "bin", "-j", "2",
        ]);
        match cli.command {
            Commands::Run {
                dry_run,
                targets,
                concurrency,
                backend,
                ..
            } => {
                assert!(dry_run);
                assert_eq!(targets, vec!["src", "bin"]);
                assert_eq!(concurrency, Some(2));
                assert_eq!(backend, Backend::Memory);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_seeded_cluster_has_external_inputs() {
        let config = PipelineConfig::from_yaml(CONFIG).unwrap();
        let cluster = seeded_cluster(&config);

        assert!(cluster.has_tag("ci", "repo-test-base", "manual"));
        assert!(cluster.has_tag("ocp", "base", "4.1"));
        use crate::clients::SecretClient;
        assert!(cluster
            .get_secret("ci-op-1", "e2e-aws-cluster-profile")
            .await
            .is_ok());
        assert!(cluster.get_stream("ci-op-1", "stable").await.is_err());
    }
}
