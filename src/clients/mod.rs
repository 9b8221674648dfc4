// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Backend clients
//!
//! Narrow capabilities steps receive at construction. The engine never
//! calls these itself.

mod memory;
mod shell;

pub use memory::MemoryCluster;
pub use shell::ShellTestClient;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::ClientError;
use crate::pipeline::PipelineTag;

/// A tag in an image stream, pointing at an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageStreamTag {
    pub namespace: String,
    pub stream: String,
    pub tag: String,
    /// Image digest or pull spec the tag resolves to
    pub image: String,
}

impl ImageStreamTag {
    /// `stream:tag`
    pub fn name(&self) -> String {
        format!("{}:{}", self.stream, self.tag)
    }
}

/// An image stream and where its images can be pulled from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageStream {
    pub namespace: String,
    pub name: String,
    /// Externally reachable repository, when exposed
    pub public_repository: String,
    /// Cluster-internal repository
    pub internal_repository: String,
}

#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn get_tag(&self, namespace: &str, stream: &str, tag: &str)
        -> Result<ImageStreamTag, ClientError>;

    async fn create_tag(&self, tag: &ImageStreamTag) -> Result<(), ClientError>;

    async fn delete_tag(&self, namespace: &str, stream: &str, tag: &str) -> Result<(), ClientError>;

    async fn get_stream(&self, namespace: &str, name: &str) -> Result<ImageStream, ClientError>;

    async fn create_stream(&self, stream: &ImageStream) -> Result<(), ClientError>;
}

/// Where a build gets its Dockerfile from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildSource {
    /// An inline Dockerfile
    Dockerfile { dockerfile: String },
    /// The Dockerfile in a directory of the source image
    ContextDir { image: PipelineTag, path: String },
}

/// A request to build `to` on top of `from`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildRequest {
    pub name: String,
    pub namespace: String,
    pub from: PipelineTag,
    pub to: PipelineTag,
    pub source: BuildSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Complete,
    Failed(String),
}

#[async_trait]
pub trait BuildClient: Send + Sync {
    async fn create_build(&self, build: &BuildRequest) -> Result<(), ClientError>;

    /// Wait until the named build finishes
    async fn wait_build(&self, namespace: &str, name: &str) -> Result<BuildStatus, ClientError>;
}

#[async_trait]
pub trait SecretClient: Send + Sync {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClientError>;
}

/// A test command to run inside a pipeline image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestJob {
    pub name: String,
    pub namespace: String,
    /// Pull spec of the image to run in
    pub image: String,
    pub commands: String,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub success: bool,
    pub output: String,
}

#[async_trait]
pub trait TestClient: Send + Sync {
    async fn run_test(
        &self,
        job: &TestJob,
        cancel: &CancellationToken,
    ) -> Result<TestOutcome, ClientError>;
}

/// The set of clients steps are constructed with
#[derive(Clone)]
pub struct Clients {
    pub images: Arc<dyn ImageClient>,
    pub builds: Arc<dyn BuildClient>,
    pub secrets: Arc<dyn SecretClient>,
    pub tests: Arc<dyn TestClient>,
}

impl Clients {
    /// Route every capability to one in-memory cluster
    pub fn memory(cluster: Arc<MemoryCluster>) -> Self {
        Self {
            images: cluster.clone(),
            builds: cluster.clone(),
            secrets: cluster.clone(),
            tests: cluster,
        }
    }

    /// Replace the test runner
    pub fn with_tests(mut self, tests: Arc<dyn TestClient>) -> Self {
        self.tests = tests;
        self
    }
}
