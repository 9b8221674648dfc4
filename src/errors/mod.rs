// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Error types
//!
//! Configuration errors are raised before any step executes; step failures
//! are recorded per node and reported together at the end of a run.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::StepLink;

/// Result type for stepflow operations
pub type StepflowResult<T> = Result<T, StepflowError>;

/// A step whose requirements can never be satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependencies {
    /// Name of the stuck step
    pub step: String,
    /// Required links with no matching producer
    pub links: Vec<StepLink>,
}

impl std::fmt::Display for MissingDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let links: Vec<String> = self.links.iter().map(ToString::to_string).collect();
        write!(f, "step '{}' is missing: {}", self.step, links.join(", "))
    }
}

fn format_missing(missing: &[MissingDependencies]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by side-effecting backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Main error type for stepflow
#[derive(Error, Debug, Diagnostic)]
pub enum StepflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Graph Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("steps are missing dependencies: {}", format_missing(.missing))]
    #[diagnostic(
        code(stepflow::missing_dependencies),
        help("every required link must be created by some step in the pipeline")
    )]
    MissingDependencies { missing: Vec<MissingDependencies> },

    #[error("Target '{target}' does not name any step")]
    #[diagnostic(code(stepflow::unknown_target))]
    UnknownTarget {
        target: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Step Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Step '{step}' ({description}) failed: {message}")]
    #[diagnostic(code(stepflow::step_failed))]
    StepFailed {
        step: String,
        description: String,
        message: String,
    },

    #[error("Test '{test}' failed")]
    #[diagnostic(code(stepflow::test_failed))]
    TestFailed {
        test: String,
        output: String,
        #[help]
        help: Option<String>,
    },

    #[error("Build '{build}' failed: {reason}")]
    #[diagnostic(code(stepflow::build_failed))]
    BuildFailed { build: String, reason: String },

    #[error("Execution was cancelled")]
    #[diagnostic(code(stepflow::cancelled))]
    Cancelled,

    // ─────────────────────────────────────────────────────────────────────────
    // Parameter Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Parameter '{name}' is not provided by any step")]
    #[diagnostic(code(stepflow::unknown_parameter))]
    UnknownParameter { name: String },

    #[error("Parameter '{name}' is not ready: step '{producer}' has not completed")]
    #[diagnostic(
        code(stepflow::parameter_not_ready),
        help("consumers must require the link that gates '{name}'")
    )]
    ParameterNotReady { name: String, producer: String },

    #[error("Could not resolve parameter '{name}' provided by '{producer}': {message}")]
    #[diagnostic(code(stepflow::resolver_failed))]
    ResolverFailed {
        name: String,
        producer: String,
        message: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(stepflow::config_not_found),
        help("Pass the pipeline configuration with --config or create stepflow.yaml")
    )]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {reason}")]
    #[diagnostic(code(stepflow::invalid_config))]
    InvalidConfig {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(stepflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Backend Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(stepflow::client_error))]
    Client(#[from] ClientError),

    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(stepflow::tool_not_found))]
    ToolNotFound {
        tool: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(stepflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(stepflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(stepflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(stepflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for StepflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for StepflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for StepflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for StepflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl StepflowError {
    /// Create an unknown target error, suggesting the closest step names
    pub fn unknown_target(target: &str, known: &[String]) -> Self {
        let close: Vec<&str> = known
            .iter()
            .filter(|name| name.contains(target) || target.contains(name.as_str()))
            .map(String::as_str)
            .collect();
        let help = if close.is_empty() {
            None
        } else {
            Some(format!("Did you mean: {}", close.join(", ")))
        };

        Self::UnknownTarget {
            target: target.to_string(),
            help,
        }
    }

    /// Create a test failure with a hint drawn from the test output
    pub fn test_failed(test: &str, output: String) -> Self {
        let help = if output.contains("command not found") {
            Some("The test image is missing a binary the test command needs.".into())
        } else if output.contains("Permission denied") {
            Some("Pipeline images run as an arbitrary user; check file modes.".into())
        } else {
            None
        };

        Self::TestFailed {
            test: test.to_string(),
            output,
            help,
        }
    }

    /// Whether this is a configuration error raised before execution
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingDependencies { .. }
                | Self::UnknownTarget { .. }
                | Self::InvalidConfig { .. }
                | Self::ConfigNotFound { .. }
        )
    }
}
