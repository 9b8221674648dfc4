// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Steps around the published release: the stable output stream, the
//! images-ready fan-in and imported release payloads.

use async_trait::async_trait;
use std::sync::Arc;

use crate::clients::{ImageClient, ImageStream, ImageStreamTag};
use crate::errors::{StepflowError, StepflowResult};
use crate::pipeline::{
    ParameterMap, PipelineTag, Resolver, Step, StepContext, StepLink, RELEASE_IMAGE_STREAM,
    STABLE_IMAGE_STREAM,
};

/// Ensures the stream output images are published to exists
pub struct StableImagesStep {
    namespace: String,
    images: Arc<dyn ImageClient>,
}

impl StableImagesStep {
    pub fn new(namespace: &str, images: Arc<dyn ImageClient>) -> Self {
        Self {
            namespace: namespace.to_string(),
            images,
        }
    }
}

#[async_trait]
impl Step for StableImagesStep {
    fn name(&self) -> String {
        "[output-images]".to_string()
    }

    fn description(&self) -> String {
        format!(
            "Create the output image stream {}/{}",
            self.namespace, STABLE_IMAGE_STREAM
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::ReleaseImages]
    }

    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        let stream = ImageStream {
            namespace: self.namespace.clone(),
            name: STABLE_IMAGE_STREAM.to_string(),
            ..ImageStream::default()
        };
        if dry_run {
            ctx.preview(serde_json::to_string(&stream)?);
            return Ok(());
        }

        match self.images.create_stream(&stream).await {
            Err(e) if e.is_already_exists() => Ok(()),
            result => Ok(result?),
        }
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        match self
            .images
            .get_stream(&self.namespace, STABLE_IMAGE_STREAM)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fan-in marking that every project image has been published
pub struct ImagesReadyStep {
    links: Vec<StepLink>,
}

impl ImagesReadyStep {
    pub fn new(links: Vec<StepLink>) -> Self {
        Self { links }
    }
}

#[async_trait]
impl Step for ImagesReadyStep {
    fn name(&self) -> String {
        "[images]".to_string()
    }

    fn description(&self) -> String {
        "All images are built and tagged into stable".to_string()
    }

    fn requires(&self) -> Vec<StepLink> {
        self.links.clone()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::ImagesReady]
    }

    async fn run(&self, ctx: &StepContext, _dry_run: bool) -> StepflowResult<()> {
        ctx.info("All images ready");
        Ok(())
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        Ok(false)
    }
}

/// Imports a release payload image into the release stream
pub struct ReleaseImportStep {
    name: PipelineTag,
    pull_spec: String,
    namespace: String,
    images: Arc<dyn ImageClient>,
}

impl ReleaseImportStep {
    pub fn new(name: &str, pull_spec: &str, namespace: &str, images: Arc<dyn ImageClient>) -> Self {
        Self {
            name: PipelineTag::from(name),
            pull_spec: pull_spec.to_string(),
            namespace: namespace.to_string(),
            images,
        }
    }

    fn parameter_name(&self) -> String {
        format!(
            "RELEASE_IMAGE_{}",
            self.name.as_str().replace('-', "_").to_uppercase()
        )
    }
}

#[async_trait]
impl Step for ReleaseImportStep {
    fn name(&self) -> String {
        format!("[release:{}]", self.name)
    }

    fn description(&self) -> String {
        format!("Import the release payload {} from {}", self.name, self.pull_spec)
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::release_payload_image(self.name.clone())]
    }

    fn provides(&self) -> Option<(ParameterMap, StepLink)> {
        let images = self.images.clone();
        let namespace = self.namespace.clone();
        let tag = self.name.to_string();

        let mut map = ParameterMap::new();
        map.insert(
            self.parameter_name(),
            Resolver::new(move || {
                let images = images.clone();
                let namespace = namespace.clone();
                let tag = tag.clone();
                async move {
                    let imported = images
                        .get_tag(&namespace, RELEASE_IMAGE_STREAM, &tag)
                        .await?;
                    Ok::<_, StepflowError>(imported.image)
                }
            }),
        );
        Some((map, StepLink::release_payload_image(self.name.clone())))
    }

    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        let tag = ImageStreamTag {
            namespace: self.namespace.clone(),
            stream: RELEASE_IMAGE_STREAM.to_string(),
            tag: self.name.to_string(),
            image: self.pull_spec.clone(),
        };
        if dry_run {
            ctx.preview(serde_json::to_string(&tag)?);
            return Ok(());
        }

        ctx.info(format!("Importing release {} from {}", self.name, self.pull_spec));
        match self.images.create_tag(&tag).await {
            Err(e) if e.is_already_exists() => Ok(()),
            result => Ok(result?),
        }
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        match self
            .images
            .get_tag(&self.namespace, RELEASE_IMAGE_STREAM, self.name.as_str())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
