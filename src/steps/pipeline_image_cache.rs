// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

use async_trait::async_trait;
use std::sync::Arc;

use super::{build_from_source, image_tag_exists, run_build};
use crate::clients::{BuildClient, BuildSource, ImageClient};
use crate::errors::StepflowResult;
use crate::pipeline::{PipelineTag, Step, StepContext, StepLink, PIPELINE_IMAGE_STREAM};

/// A Dockerfile running `commands` on top of `pipeline:<from>`
pub fn raw_command_dockerfile(from: &PipelineTag, commands: &str) -> String {
    let script = serde_json::Value::String(format!("set -o errexit; umask 0002; {}", commands));
    format!(
        "FROM {}:{}\nRUN [\"/bin/bash\", \"-c\", {}]",
        PIPELINE_IMAGE_STREAM, from, script
    )
}

/// Caches the result of running commands as a new pipeline image layer
pub struct PipelineImageCacheStep {
    from: PipelineTag,
    to: PipelineTag,
    commands: String,
    namespace: String,
    images: Arc<dyn ImageClient>,
    builds: Arc<dyn BuildClient>,
}

impl PipelineImageCacheStep {
    pub fn new(
        from: PipelineTag,
        to: PipelineTag,
        commands: &str,
        namespace: &str,
        images: Arc<dyn ImageClient>,
        builds: Arc<dyn BuildClient>,
    ) -> Self {
        Self {
            from,
            to,
            commands: commands.to_string(),
            namespace: namespace.to_string(),
            images,
            builds,
        }
    }
}

#[async_trait]
impl Step for PipelineImageCacheStep {
    fn name(&self) -> String {
        self.to.to_string()
    }

    fn description(&self) -> String {
        format!(
            "Store build results into a layer on top of {} and save as {}",
            self.from, self.to
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::internal_image(self.from.clone())]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::internal_image(self.to.clone())]
    }

    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        let dockerfile = raw_command_dockerfile(&self.from, &self.commands);
        let build = build_from_source(
            &self.namespace,
            &self.from,
            &self.to,
            BuildSource::Dockerfile { dockerfile },
        );
        run_build(ctx, self.builds.as_ref(), build, dry_run).await
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        image_tag_exists(self.images.as_ref(), &self.namespace, &self.to).await
    }
}
