// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

use async_trait::async_trait;
use std::sync::Arc;

use super::image_tag_exists;
use crate::clients::{ImageClient, ImageStreamTag};
use crate::errors::StepflowResult;
use crate::pipeline::{
    ImageTagReference, InputDefinition, PipelineTag, Step, StepContext, StepLink,
    PIPELINE_IMAGE_STREAM,
};

/// Tags an external base image into the pipeline image stream
pub struct InputImageTagStep {
    base_image: ImageTagReference,
    to: PipelineTag,
    namespace: String,
    images: Arc<dyn ImageClient>,
}

impl InputImageTagStep {
    pub fn new(
        base_image: ImageTagReference,
        to: PipelineTag,
        namespace: &str,
        images: Arc<dyn ImageClient>,
    ) -> Self {
        Self {
            base_image,
            to,
            namespace: namespace.to_string(),
            images,
        }
    }

    async fn base_image_id(&self) -> StepflowResult<String> {
        let tag = self
            .images
            .get_tag(
                &self.base_image.namespace,
                &self.base_image.name,
                &self.base_image.tag,
            )
            .await?;
        Ok(tag.image)
    }
}

#[async_trait]
impl Step for InputImageTagStep {
    fn name(&self) -> String {
        format!("[input:{}]", self.to)
    }

    fn description(&self) -> String {
        format!(
            "Find the input image {} and tag it into the pipeline",
            self.base_image
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::internal_image(self.to.clone())]
    }

    async fn inputs(&self, _ctx: &StepContext, _dry_run: bool) -> StepflowResult<InputDefinition> {
        let mut inputs = InputDefinition::new();
        inputs.insert(self.base_image.to_string(), self.base_image_id().await?);
        Ok(inputs)
    }

    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        ctx.info(format!(
            "Tagging {} into {}:{}",
            self.base_image, PIPELINE_IMAGE_STREAM, self.to
        ));

        let tag = ImageStreamTag {
            namespace: self.namespace.clone(),
            stream: PIPELINE_IMAGE_STREAM.to_string(),
            tag: self.to.to_string(),
            image: self.base_image_id().await?,
        };

        if dry_run {
            ctx.preview(serde_json::to_string_pretty(&tag)?);
            return Ok(());
        }

        match self.images.create_tag(&tag).await {
            Err(e) if e.is_already_exists() => Ok(()),
            result => Ok(result?),
        }
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        image_tag_exists(self.images.as_ref(), &self.namespace, &self.to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MemoryCluster;
    use crate::steps::fixtures::{context, NAMESPACE};

    fn step(cluster: &Arc<MemoryCluster>) -> InputImageTagStep {
        InputImageTagStep::new(
            ImageTagReference::new("base-1", "repo-test-base", "manual"),
            PipelineTag::root(),
            NAMESPACE,
            cluster.clone(),
        )
    }

    #[tokio::test]
    async fn test_tags_base_image_into_pipeline() {
        let cluster = Arc::new(
            MemoryCluster::new().with_tag("base-1", "repo-test-base", "manual", "sha256:base"),
        );
        let step = step(&cluster);
        let (ctx, _) = context(&step.name());

        assert_eq!(step.name(), "[input:root]");
        assert!(!step.done(&ctx).await.unwrap());

        let inputs = step.inputs(&ctx, false).await.unwrap();
        assert_eq!(inputs.values().next().map(String::as_str), Some("sha256:base"));

        step.run(&ctx, false).await.unwrap();
        assert!(step.done(&ctx).await.unwrap());
        let tag = cluster
            .get_tag(NAMESPACE, PIPELINE_IMAGE_STREAM, "root")
            .await
            .unwrap();
        assert_eq!(tag.image, "sha256:base");
    }

    #[tokio::test]
    async fn test_dry_run_does_not_tag() {
        let cluster = Arc::new(
            MemoryCluster::new().with_tag("base-1", "repo-test-base", "manual", "sha256:base"),
        );
        let step = step(&cluster);
        let (ctx, sink) = context(&step.name());

        step.run(&ctx, true).await.unwrap();

        assert!(cluster.mutations().is_empty());
        assert!(sink.previews()[0].contains("sha256:base"));
    }

    #[tokio::test]
    async fn test_missing_base_image_fails() {
        let cluster = Arc::new(MemoryCluster::new());
        let step = step(&cluster);
        let (ctx, _) = context(&step.name());

        let err = step.run(&ctx, false).await.unwrap_err();
        assert!(err.to_string().contains("repo-test-base"));
    }
}
