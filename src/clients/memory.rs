// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! In-process backend
//!
//! Keeps image streams, builds, secrets and test runs in memory and records
//! every mutation, so pipelines can be rehearsed without a cluster.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use super::{
    BuildClient, BuildRequest, BuildStatus, ImageClient, ImageStream, ImageStreamTag,
    SecretClient, TestClient, TestJob, TestOutcome,
};
use crate::errors::ClientError;
use crate::pipeline::PIPELINE_IMAGE_STREAM;

#[derive(Default)]
struct State {
    tags: BTreeMap<(String, String, String), ImageStreamTag>,
    streams: BTreeMap<(String, String), ImageStream>,
    builds: BTreeMap<(String, String), BuildRequest>,
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    tests: Vec<TestJob>,
    mutations: Vec<String>,
    failing_builds: BTreeSet<String>,
    failing_tests: BTreeSet<String>,
}

/// A cluster that lives in memory
pub struct MemoryCluster {
    registry: String,
    state: Mutex<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            registry: "image-registry.local:5000".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an existing tag
    pub fn with_tag(self, namespace: &str, stream: &str, tag: &str, image: &str) -> Self {
        let tag = ImageStreamTag {
            namespace: namespace.to_string(),
            stream: stream.to_string(),
            tag: tag.to_string(),
            image: image.to_string(),
        };
        self.state().tags.insert(tag_key(&tag), tag);
        self
    }

    /// Seed an existing image stream
    pub fn with_stream(self, stream: ImageStream) -> Self {
        self.state()
            .streams
            .insert((stream.namespace.clone(), stream.name.clone()), stream);
        self
    }

    pub fn with_secret(self, namespace: &str, name: &str, data: BTreeMap<String, String>) -> Self {
        self.state()
            .secrets
            .insert((namespace.to_string(), name.to_string()), data);
        self
    }

    /// Make the named build finish unsuccessfully
    pub fn fail_build(self, name: &str) -> Self {
        self.state().failing_builds.insert(name.to_string());
        self
    }

    /// Make the named test report failure
    pub fn fail_test(self, name: &str) -> Self {
        self.state().failing_tests.insert(name.to_string());
        self
    }

    pub fn has_tag(&self, namespace: &str, stream: &str, tag: &str) -> bool {
        self.state().tags.contains_key(&(
            namespace.to_string(),
            stream.to_string(),
            tag.to_string(),
        ))
    }

    /// Every mutation applied, in order
    pub fn mutations(&self) -> Vec<String> {
        self.state().mutations.clone()
    }

    pub fn tests_run(&self) -> Vec<TestJob> {
        self.state().tests.clone()
    }

    pub fn builds(&self) -> Vec<BuildRequest> {
        self.state().builds.values().cloned().collect()
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn tag_key(tag: &ImageStreamTag) -> (String, String, String) {
    (tag.namespace.clone(), tag.stream.clone(), tag.tag.clone())
}

#[async_trait]
impl ImageClient for MemoryCluster {
    async fn get_tag(
        &self,
        namespace: &str,
        stream: &str,
        tag: &str,
    ) -> Result<ImageStreamTag, ClientError> {
        self.state()
            .tags
            .get(&(namespace.to_string(), stream.to_string(), tag.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: "imagestreamtag",
                name: format!("{}/{}:{}", namespace, stream, tag),
            })
    }

    async fn create_tag(&self, tag: &ImageStreamTag) -> Result<(), ClientError> {
        let mut state = self.state();
        if state.tags.contains_key(&tag_key(tag)) {
            return Err(ClientError::AlreadyExists {
                kind: "imagestreamtag",
                name: tag.name(),
            });
        }
        state.mutations.push(format!(
            "create imagestreamtag {}/{} -> {}",
            tag.namespace,
            tag.name(),
            tag.image
        ));
        state.tags.insert(tag_key(tag), tag.clone());
        Ok(())
    }

    async fn delete_tag(&self, namespace: &str, stream: &str, tag: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        let key = (namespace.to_string(), stream.to_string(), tag.to_string());
        if state.tags.remove(&key).is_none() {
            return Err(ClientError::NotFound {
                kind: "imagestreamtag",
                name: format!("{}:{}", stream, tag),
            });
        }
        state
            .mutations
            .push(format!("delete imagestreamtag {}/{}:{}", namespace, stream, tag));
        Ok(())
    }

    async fn get_stream(&self, namespace: &str, name: &str) -> Result<ImageStream, ClientError> {
        self.state()
            .streams
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: "imagestream",
                name: format!("{}/{}", namespace, name),
            })
    }

    async fn create_stream(&self, stream: &ImageStream) -> Result<(), ClientError> {
        let mut state = self.state();
        let key = (stream.namespace.clone(), stream.name.clone());
        if state.streams.contains_key(&key) {
            return Err(ClientError::AlreadyExists {
                kind: "imagestream",
                name: stream.name.clone(),
            });
        }
        let mut stream = stream.clone();
        if stream.internal_repository.is_empty() {
            stream.internal_repository =
                format!("{}/{}/{}", self.registry, stream.namespace, stream.name);
        }
        state
            .mutations
            .push(format!("create imagestream {}/{}", stream.namespace, stream.name));
        state.streams.insert(key, stream);
        Ok(())
    }
}

#[async_trait]
impl BuildClient for MemoryCluster {
    async fn create_build(&self, build: &BuildRequest) -> Result<(), ClientError> {
        let mut state = self.state();
        let key = (build.namespace.clone(), build.name.clone());
        if state.builds.contains_key(&key) {
            return Err(ClientError::AlreadyExists {
                kind: "build",
                name: build.name.clone(),
            });
        }
        state
            .mutations
            .push(format!("create build {}/{}", build.namespace, build.name));
        state.builds.insert(key, build.clone());

        // Builds finish instantly and push their output into the pipeline stream
        if !state.failing_builds.contains(&build.name) {
            let tag = ImageStreamTag {
                namespace: build.namespace.clone(),
                stream: PIPELINE_IMAGE_STREAM.to_string(),
                tag: build.to.to_string(),
                image: format!("sha256:{}", build.name),
            };
            state.tags.insert(tag_key(&tag), tag);
        }
        Ok(())
    }

    async fn wait_build(&self, namespace: &str, name: &str) -> Result<BuildStatus, ClientError> {
        let state = self.state();
        if !state
            .builds
            .contains_key(&(namespace.to_string(), name.to_string()))
        {
            return Err(ClientError::NotFound {
                kind: "build",
                name: name.to_string(),
            });
        }
        if state.failing_builds.contains(name) {
            Ok(BuildStatus::Failed("build exited with status 1".into()))
        } else {
            Ok(BuildStatus::Complete)
        }
    }
}

#[async_trait]
impl SecretClient for MemoryCluster {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClientError> {
        self.state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: "secret",
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl TestClient for MemoryCluster {
    async fn run_test(
        &self,
        job: &TestJob,
        cancel: &CancellationToken,
    ) -> Result<TestOutcome, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Other(format!("test {} was cancelled", job.name)));
        }
        let mut state = self.state();
        state.mutations.push(format!("run test {}/{}", job.namespace, job.name));
        state.tests.push(job.clone());

        let success = !state.failing_tests.contains(&job.name);
        Ok(TestOutcome {
            success,
            output: if success {
                format!("{}: ok", job.name)
            } else {
                format!("{}: FAIL", job.name)
            },
        })
    }
}
