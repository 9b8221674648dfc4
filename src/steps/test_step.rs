// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clients::{ImageClient, TestClient, TestJob};
use crate::errors::{StepflowError, StepflowResult};
use crate::pipeline::{
    ParameterSource, Step, StepContext, StepLink, TestConfig, PIPELINE_IMAGE_STREAM,
};

/// Runs test commands inside a pipeline image
///
/// Tests are never considered done, so every invocation runs them again.
pub struct TestStep {
    config: TestConfig,
    parameters: Vec<String>,
    namespace: String,
    params: Arc<dyn ParameterSource>,
    images: Arc<dyn ImageClient>,
    tests: Arc<dyn TestClient>,
}

impl TestStep {
    pub fn new(
        config: TestConfig,
        namespace: &str,
        params: Arc<dyn ParameterSource>,
        images: Arc<dyn ImageClient>,
        tests: Arc<dyn TestClient>,
    ) -> Self {
        let parameters = config.parameters.clone();
        Self {
            config,
            parameters,
            namespace: namespace.to_string(),
            params,
            images,
            tests,
        }
    }

    /// Also export `names` to the test environment
    pub fn with_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.parameters.contains(&name) {
                self.parameters.push(name);
            }
        }
        self
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    async fn environment(&self) -> StepflowResult<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        for name in &self.parameters {
            env.insert(name.clone(), self.params.get(name).await?);
        }
        Ok(env)
    }
}

#[async_trait]
impl Step for TestStep {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn description(&self) -> String {
        format!("Run test {}", self.config.name)
    }

    fn requires(&self) -> Vec<StepLink> {
        let mut links = vec![StepLink::internal_image(self.config.from.clone())];
        for name in &self.parameters {
            for link in self.params.links(name) {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
        links
    }

    fn creates(&self) -> Vec<StepLink> {
        Vec::new()
    }

    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        if dry_run {
            let env = self
                .parameters
                .iter()
                .map(|name| (name.clone(), format!("${{{}}}", name)))
                .collect();
            let job = TestJob {
                name: self.config.name.clone(),
                namespace: self.namespace.clone(),
                image: format!("{}:{}", PIPELINE_IMAGE_STREAM, self.config.from),
                commands: self.config.commands.clone(),
                env,
            };
            ctx.preview(serde_json::to_string_pretty(&job)?);
            return Ok(());
        }

        let image = self
            .images
            .get_tag(
                &self.namespace,
                PIPELINE_IMAGE_STREAM,
                self.config.from.as_str(),
            )
            .await?
            .image;
        let job = TestJob {
            name: self.config.name.clone(),
            namespace: self.namespace.clone(),
            image,
            commands: self.config.commands.clone(),
            env: self.environment().await?,
        };

        ctx.info(format!("Running test {}", job.name));
        let outcome = self.tests.run_test(&job, &ctx.cancellation).await?;
        if !outcome.success {
            return Err(StepflowError::test_failed(&job.name, outcome.output));
        }
        ctx.info(format!("Test {} succeeded", job.name));
        Ok(())
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        Ok(false)
    }
}
