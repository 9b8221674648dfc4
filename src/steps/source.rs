// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

use async_trait::async_trait;
use std::sync::Arc;

use super::{build_from_source, image_tag_exists, run_build};
use crate::clients::{BuildClient, BuildSource, ImageClient};
use crate::errors::StepflowResult;
use crate::pipeline::{JobSpec, PipelineTag, Step, StepContext, StepLink, PIPELINE_IMAGE_STREAM};

/// Clones the job's source tree on top of the build root
pub struct SourceStep {
    from: PipelineTag,
    to: PipelineTag,
    job: JobSpec,
    images: Arc<dyn ImageClient>,
    builds: Arc<dyn BuildClient>,
}

impl SourceStep {
    pub fn new(job: &JobSpec, images: Arc<dyn ImageClient>, builds: Arc<dyn BuildClient>) -> Self {
        Self {
            from: PipelineTag::root(),
            to: PipelineTag::source(),
            job: job.clone(),
            images,
            builds,
        }
    }
}

fn source_dockerfile(from: &PipelineTag, job: &JobSpec) -> String {
    let dir = format!("/go/src/github.com/{}/{}", job.org, job.repo);
    format!(
        "FROM {stream}:{from}\n\
         ENV GIT_COMMITTER_NAME=developer GIT_COMMITTER_EMAIL=developer@example.com\n\
         RUN git clone --branch {base_ref} https://github.com/{org}/{repo}.git {dir}\n\
         WORKDIR {dir}/",
        stream = PIPELINE_IMAGE_STREAM,
        from = from,
        base_ref = job.base_ref,
        org = job.org,
        repo = job.repo,
        dir = dir,
    )
}

#[async_trait]
impl Step for SourceStep {
    fn name(&self) -> String {
        self.to.to_string()
    }

    fn description(&self) -> String {
        format!(
            "Clone the correct source code into an image and tag it as {}",
            self.to
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::internal_image(self.from.clone())]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::internal_image(self.to.clone())]
    }

    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        let dockerfile = source_dockerfile(&self.from, &self.job);
        let build = build_from_source(
            &self.job.namespace,
            &self.from,
            &self.to,
            BuildSource::Dockerfile { dockerfile },
        );
        run_build(ctx, self.builds.as_ref(), build, dry_run).await
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        image_tag_exists(self.images.as_ref(), &self.job.namespace, &self.to).await
    }
}
