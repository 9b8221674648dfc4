// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

use async_trait::async_trait;
use std::sync::Arc;

use crate::clients::{ImageClient, ImageStreamTag};
use crate::errors::{ClientError, StepflowError, StepflowResult};
use crate::pipeline::{
    ImageTagReference, ParameterMap, PipelineTag, Resolver, Step, StepContext, StepLink,
    PIPELINE_IMAGE_STREAM,
};

/// Publishes a built pipeline image under a tag in an output stream
pub struct OutputImageTagStep {
    from: PipelineTag,
    to: ImageTagReference,
    namespace: String,
    images: Arc<dyn ImageClient>,
}

impl OutputImageTagStep {
    pub fn new(
        from: PipelineTag,
        to: ImageTagReference,
        namespace: &str,
        images: Arc<dyn ImageClient>,
    ) -> Self {
        Self {
            from,
            to,
            namespace: namespace.to_string(),
            images,
        }
    }

    fn target_namespace(&self) -> &str {
        if self.to.namespace.is_empty() {
            &self.namespace
        } else {
            &self.to.namespace
        }
    }

    /// Environment name of the published pull spec, e.g. `IMAGE_CLI_ALIAS`
    fn parameter_name(&self) -> String {
        let name = self.to.alias.as_deref().unwrap_or(&self.to.tag);
        format!("IMAGE_{}", name.replace('-', "_").to_uppercase())
    }
}

/// Pull spec of `stream:tag`, preferring the public registry
async fn published_pull_spec(
    images: &dyn ImageClient,
    namespace: &str,
    stream: &str,
    tag: &str,
) -> StepflowResult<String> {
    let is = images.get_stream(namespace, stream).await?;
    let registry = if !is.public_repository.is_empty() {
        is.public_repository
    } else if !is.internal_repository.is_empty() {
        is.internal_repository
    } else {
        return Err(StepflowError::Client(ClientError::Other(format!(
            "image stream {} has no accessible image registry value",
            stream
        ))));
    };
    Ok(format!("{}:{}", registry, tag))
}

#[async_trait]
impl Step for OutputImageTagStep {
    fn name(&self) -> String {
        match &self.to.alias {
            Some(alias) => alias.clone(),
            None => format!("[output:{}:{}]", self.to.name, self.to.tag),
        }
    }

    fn description(&self) -> String {
        format!(
            "Tag the image {} into the stable image stream {}",
            self.from, self.to
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![
            StepLink::internal_image(self.from.clone()),
            StepLink::ReleaseImages,
        ]
    }

    fn creates(&self) -> Vec<StepLink> {
        let mut links = vec![StepLink::external_image(self.to.clone())];
        if let Some(alias) = &self.to.alias {
            links.push(StepLink::internal_image(alias.as_str()));
        }
        links
    }

    fn provides(&self) -> Option<(ParameterMap, StepLink)> {
        let images = self.images.clone();
        let namespace = self.target_namespace().to_string();
        let stream = self.to.name.clone();
        let tag = self.to.tag.clone();

        let mut map = ParameterMap::new();
        map.insert(
            self.parameter_name(),
            Resolver::new(move || {
                let images = images.clone();
                let namespace = namespace.clone();
                let stream = stream.clone();
                let tag = tag.clone();
                async move { published_pull_spec(images.as_ref(), &namespace, &stream, &tag).await }
            }),
        );
        Some((map, StepLink::external_image(self.to.clone())))
    }

    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        ctx.info(format!(
            "Tagging {}/{}:{} into {}:{}",
            self.namespace, PIPELINE_IMAGE_STREAM, self.from, self.to.name, self.to.tag
        ));

        let image = if dry_run {
            "dry-fake".to_string()
        } else {
            self.images
                .get_tag(&self.namespace, PIPELINE_IMAGE_STREAM, self.from.as_str())
                .await
                .map_err(|e| {
                    StepflowError::Client(ClientError::Other(format!(
                        "could not resolve base image: {}",
                        e
                    )))
                })?
                .image
        };

        let tag = ImageStreamTag {
            namespace: self.target_namespace().to_string(),
            stream: self.to.name.clone(),
            tag: self.to.tag.clone(),
            image,
        };

        if dry_run {
            ctx.preview(serde_json::to_string(&tag)?);
            return Ok(());
        }

        // Replace any tag left over from an earlier run
        match self
            .images
            .delete_tag(&tag.namespace, &tag.stream, &tag.tag)
            .await
        {
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => {}
        }

        match self.images.create_tag(&tag).await {
            // another run raced us to the same end state
            Err(e) if e.is_already_exists() => Ok(()),
            result => Ok(result?),
        }
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        match self
            .images
            .get_tag(self.target_namespace(), &self.to.name, &self.to.tag)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
