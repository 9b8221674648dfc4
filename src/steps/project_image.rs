// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

use async_trait::async_trait;
use std::sync::Arc;

use super::{build_from_source, image_tag_exists, run_build};
use crate::clients::{BuildClient, BuildSource, ImageClient};
use crate::errors::StepflowResult;
use crate::pipeline::{InputDefinition, PipelineTag, Step, StepContext, StepLink};

/// Builds a project image from a Dockerfile in the source tree
pub struct ProjectImageStep {
    from: PipelineTag,
    to: PipelineTag,
    context_dir: String,
    namespace: String,
    images: Arc<dyn ImageClient>,
    builds: Arc<dyn BuildClient>,
}

impl ProjectImageStep {
    pub fn new(
        from: PipelineTag,
        to: PipelineTag,
        context_dir: Option<&str>,
        namespace: &str,
        images: Arc<dyn ImageClient>,
        builds: Arc<dyn BuildClient>,
    ) -> Self {
        Self {
            from,
            to,
            context_dir: context_dir.unwrap_or(".").to_string(),
            namespace: namespace.to_string(),
            images,
            builds,
        }
    }
}

#[async_trait]
impl Step for ProjectImageStep {
    fn name(&self) -> String {
        self.to.to_string()
    }

    fn description(&self) -> String {
        format!("Build image {} from the repository", self.to)
    }

    fn requires(&self) -> Vec<StepLink> {
        let mut links = vec![StepLink::internal_image(self.from.clone())];
        if self.from != PipelineTag::source() {
            links.push(StepLink::internal_image(PipelineTag::source()));
        }
        links
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::internal_image(self.to.clone())]
    }

    async fn inputs(&self, _ctx: &StepContext, _dry_run: bool) -> StepflowResult<InputDefinition> {
        let mut inputs = InputDefinition::new();
        inputs.insert("from".into(), self.from.to_string());
        inputs.insert("context_dir".into(), self.context_dir.clone());
        Ok(inputs)
    }

    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        let build = build_from_source(
            &self.namespace,
            &self.from,
            &self.to,
            BuildSource::ContextDir {
                image: PipelineTag::source(),
                path: self.context_dir.clone(),
            },
        );
        run_build(ctx, self.builds.as_ref(), build, dry_run).await
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

    #[tokio::test]
    async fn test_builds_from_context_dir() {
        let cluster = Arc::new(MemoryCluster::new());
        let step = ProjectImageStep::new(
            PipelineTag::root(),
            PipelineTag::from("cli"),
            Some("images/cli"),
            NAMESPACE,
            cluster.clone(),
            cluster.clone(),
        );
        let (ctx, _) = context(&step.name());

        assert_eq!(
            step.requires(),
            vec![
                StepLink::internal_image("root"),
                StepLink::internal_image("src")
            ]
        );

        step.run(&ctx, false).await.unwrap();
        assert_eq!(
            cluster.builds()[0].source,
            BuildSource::ContextDir {
                image: PipelineTag::source(),
                path: "images/cli".into()
            }
        );
        assert!(step.done(&ctx).await.unwrap());
    }
}
