// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Concrete pipeline steps
//!
//! Each step is a flat struct implementing [`Step`](crate::pipeline::Step)
//! and holding only the clients it needs.

mod cluster_install;
mod input_image_tag;
mod output_image_tag;
mod pipeline_image_cache;
mod project_image;
mod release;
mod source;
mod test_step;

pub use cluster_install::ClusterInstallStep;
pub use input_image_tag::InputImageTagStep;
pub use output_image_tag::OutputImageTagStep;
pub use pipeline_image_cache::{raw_command_dockerfile, PipelineImageCacheStep};
pub use project_image::ProjectImageStep;
pub use release::{ImagesReadyStep, ReleaseImportStep, StableImagesStep};
pub use source::SourceStep;
pub use test_step::TestStep;

use crate::clients::{BuildClient, BuildRequest, BuildSource, BuildStatus, ImageClient};
use crate::errors::{StepflowError, StepflowResult};
use crate::pipeline::{PipelineTag, StepContext, PIPELINE_IMAGE_STREAM};

/// Whether `pipeline:<tag>` exists in `namespace`
pub(crate) async fn image_tag_exists(
    images: &dyn ImageClient,
    namespace: &str,
    tag: &PipelineTag,
) -> StepflowResult<bool> {
    match images
        .get_tag(namespace, PIPELINE_IMAGE_STREAM, tag.as_str())
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// A build of `to` on top of `from`, named after its output
pub(crate) fn build_from_source(
    namespace: &str,
    from: &PipelineTag,
    to: &PipelineTag,
    source: BuildSource,
) -> BuildRequest {
    BuildRequest {
        name: to.to_string(),
        namespace: namespace.to_string(),
        from: from.clone(),
        to: to.clone(),
        source,
    }
}

/// Submit `build` and wait for it to finish
///
/// In dry-run mode the build is only previewed. A build that already exists
/// is waited on rather than treated as a failure.
pub(crate) async fn run_build(
    ctx: &StepContext,
    builds: &dyn BuildClient,
    build: BuildRequest,
    dry_run: bool,
) -> StepflowResult<()> {
    if dry_run {
        ctx.preview(serde_json::to_string_pretty(&build)?);
        return Ok(());
    }

    match builds.create_build(&build).await {
        Ok(()) => ctx.info(format!("Created build {}", build.name)),
        Err(e) if e.is_already_exists() => {
            ctx.info(format!("Build {} already exists, waiting for it", build.name))
        }
        Err(e) => return Err(e.into()),
    }

    let status = tokio::select! {
        status = builds.wait_build(&build.namespace, &build.name) => status?,
        _ = ctx.cancellation.cancelled() => return Err(StepflowError::Cancelled),
    };

    match status {
        BuildStatus::Complete => Ok(()),
        BuildStatus::Failed(reason) => Err(StepflowError::BuildFailed {
            build: build.name,
            reason,
        }),
    }
}
