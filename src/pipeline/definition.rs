// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for stepflow configuration files and the image
//! references steps exchange through their links.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::errors::{StepflowError, StepflowResult};

/// Name of the image stream holding pipeline-internal images
pub const PIPELINE_IMAGE_STREAM: &str = "pipeline";

/// Name of the image stream project images are published to
pub const STABLE_IMAGE_STREAM: &str = "stable";

/// Name of the image stream release payloads are imported into
pub const RELEASE_IMAGE_STREAM: &str = "release";

/// A tag in the pipeline-internal image stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineTag(String);

impl PipelineTag {
    /// The image the build root is tagged into
    pub fn root() -> Self {
        Self("root".into())
    }

    /// The image holding the cloned source
    pub fn source() -> Self {
        Self("src".into())
    }

    pub fn binaries() -> Self {
        Self("bin".into())
    }

    pub fn test_binaries() -> Self {
        Self("test-bin".into())
    }

    pub fn rpms() -> Self {
        Self("rpms".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PipelineTag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PipelineTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PipelineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag in a named image stream, optionally carrying an alias
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTagReference {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
    /// Alias the image is known by inside the pipeline
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImageTagReference {
    pub fn new(namespace: &str, name: &str, tag: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }
}

impl fmt::Display for ImageTagReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.tag)?;
        if let Some(alias) = &self.alias {
            write!(f, " (as {})", alias)?;
        }
        Ok(())
    }
}

/// The job a pipeline is run for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Source repository organization
    pub org: String,
    /// Source repository name
    pub repo: String,
    /// Branch to test
    #[serde(default = "default_base_ref")]
    pub base_ref: String,
    /// Namespace all pipeline objects are created in
    pub namespace: String,
    /// Namespace base images are read from
    #[serde(default = "default_base_namespace")]
    pub base_namespace: String,
}

fn default_base_ref() -> String {
    "main".to_string()
}

fn default_base_namespace() -> String {
    "ci".to_string()
}

/// Declarative description of what to build and test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// Image everything else is built on top of
    pub build_root: ImageTagReference,

    /// Additional images tagged into the pipeline stream, keyed by pipeline tag
    #[serde(default)]
    pub base_images: BTreeMap<String, ImageTagReference>,

    /// Commands that compile the project into `bin`
    #[serde(default)]
    pub binary_build_commands: Option<String>,

    /// Commands that compile test binaries into `test-bin`
    #[serde(default)]
    pub test_binary_build_commands: Option<String>,

    /// Commands that build RPMs into `rpms`
    #[serde(default)]
    pub rpm_build_commands: Option<String>,

    /// Directory of the source tree the RPM build writes its repository to
    #[serde(default)]
    pub rpm_build_location: Option<String>,

    /// Project images built from the source tree
    #[serde(default)]
    pub images: Vec<ImageBuildConfig>,

    /// Release payloads to import, keyed by name
    #[serde(default)]
    pub releases: BTreeMap<String, String>,

    /// Tests run once their images exist
    #[serde(default)]
    pub tests: Vec<TestConfig>,
}

/// A project image build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBuildConfig {
    pub from: PipelineTag,
    pub to: PipelineTag,
    /// Directory of the source tree holding the Dockerfile
    #[serde(default)]
    pub context_dir: Option<String>,
}

/// A test run against a pipeline image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(rename = "as")]
    pub name: String,
    pub commands: String,
    #[serde(default = "PipelineTag::source")]
    pub from: PipelineTag,
    /// Parameters exported to the test environment
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Install a cluster before running the commands
    #[serde(default)]
    pub cluster: Option<ClusterTestConfig>,
}

/// Cluster installation settings for a test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTestConfig {
    /// Cluster profile, e.g. `aws` or `gcp-ha`
    pub profile: String,
    /// Install the `initial` release and upgrade to the built one
    #[serde(default)]
    pub upgrade: bool,
}

/// How a run is driven
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Validate and preview without mutating anything
    #[serde(default)]
    pub dry_run: bool,
    /// Only run these steps and what they depend on
    #[serde(default)]
    pub targets: Vec<String>,
    /// Maximum number of steps running at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Stop scheduling after the first failure
    #[serde(default)]
    pub fail_fast: bool,
    /// Fixed parameter values shadowing what steps provide
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

fn default_concurrency() -> usize {
    4
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            targets: Vec::new(),
            concurrency: default_concurrency(),
            fail_fast: false,
            overrides: BTreeMap::new(),
        }
    }
}

/// A stepflow configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub job: JobSpec,
    pub build: BuildConfiguration,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl PipelineConfig {
    /// Load a configuration file, picking the format from its extension
    pub fn from_file(path: &Path) -> StepflowResult<Self> {
        if !path.exists() {
            return Err(StepflowError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| StepflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse a configuration from YAML
    pub fn from_yaml(yaml: &str) -> StepflowResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.check()?;
        Ok(config)
    }

    /// Parse a configuration from TOML
    pub fn from_toml(content: &str) -> StepflowResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> StepflowResult<()> {
        if self.build.build_root.tag.is_empty() {
            return Err(StepflowError::InvalidConfig {
                reason: "build_root.tag is empty".into(),
                help: Some("Set the tag of the build root image, e.g. 'golang-1.22'".into()),
            });
        }
        if self.execution.concurrency == 0 {
            return Err(StepflowError::InvalidConfig {
                reason: "execution.concurrency must be at least 1".into(),
                help: None,
            });
        }
        for test in &self.build.tests {
            if test.commands.trim().is_empty() {
                return Err(StepflowError::InvalidConfig {
                    reason: format!("test '{}' has no commands", test.name),
                    help: None,
                });
            }
        }
        Ok(())
    }
}
