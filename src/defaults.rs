// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Configuration defaulting
//!
//! Turns a declarative build configuration into the flat list of steps the
//! engine orders and runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clients::Clients;
use crate::errors::{StepflowError, StepflowResult};
use crate::pipeline::{
    BuildConfiguration, ImageTagReference, JobSpec, OverrideParameters, ParameterSource,
    Parameters, PipelineTag, Step, STABLE_IMAGE_STREAM,
};
use crate::steps::{
    ClusterInstallStep, ImagesReadyStep, InputImageTagStep, OutputImageTagStep,
    PipelineImageCacheStep, ProjectImageStep, ReleaseImportStep, SourceStep, StableImagesStep,
    TestStep,
};

const DEFAULT_RPM_LOCATION: &str = "_output/local/releases/rpms/";

/// The steps of a pipeline and the parameters they provide
pub struct PipelinePlan {
    pub steps: Vec<Arc<dyn Step>>,
    /// Aggregated provided parameters; the executor marks them ready
    pub parameters: Parameters,
}

/// Where the build root comes from, filling in the job's defaults
fn build_root_image(config: &BuildConfiguration, job: &JobSpec) -> ImageTagReference {
    let root = &config.build_root;
    ImageTagReference::new(
        if root.namespace.is_empty() {
            &job.base_namespace
        } else {
            &root.namespace
        },
        &if root.name.is_empty() {
            format!("{}-test-base", job.repo)
        } else {
            root.name.clone()
        },
        &root.tag,
    )
}

fn rpm_commands(config: &BuildConfiguration, commands: &str) -> String {
    let location = config
        .rpm_build_location
        .as_deref()
        .unwrap_or(DEFAULT_RPM_LOCATION);
    format!("{}; ln -s $( pwd )/{} /srv/repo", commands, location)
}

/// Build the step list for `config`
///
/// Test steps see the aggregated parameters through a layer holding
/// `overrides`.
pub fn from_config(
    config: &BuildConfiguration,
    job: &JobSpec,
    overrides: &BTreeMap<String, String>,
    clients: &Clients,
) -> StepflowResult<PipelinePlan> {
    let ns = job.namespace.as_str();
    let mut steps: Vec<Arc<dyn Step>> = Vec::new();

    steps.push(Arc::new(InputImageTagStep::new(
        build_root_image(config, job),
        PipelineTag::root(),
        ns,
        clients.images.clone(),
    )));
    steps.push(Arc::new(SourceStep::new(
        job,
        clients.images.clone(),
        clients.builds.clone(),
    )));

    let cache = |from: PipelineTag, to: PipelineTag, commands: &str| -> Arc<dyn Step> {
        Arc::new(PipelineImageCacheStep::new(
            from,
            to,
            commands,
            ns,
            clients.images.clone(),
            clients.builds.clone(),
        ))
    };
    if let Some(commands) = &config.binary_build_commands {
        steps.push(cache(PipelineTag::source(), PipelineTag::binaries(), commands));
    }
    if let Some(commands) = &config.test_binary_build_commands {
        steps.push(cache(
            PipelineTag::source(),
            PipelineTag::test_binaries(),
            commands,
        ));
    }
    if let Some(commands) = &config.rpm_build_commands {
        let from = if config.binary_build_commands.is_some() {
            PipelineTag::binaries()
        } else {
            PipelineTag::source()
        };
        steps.push(cache(from, PipelineTag::rpms(), &rpm_commands(config, commands)));
    }

    for (name, reference) in &config.base_images {
        if reference.namespace.is_empty() || reference.name.is_empty() {
            return Err(StepflowError::InvalidConfig {
                reason: format!("base image '{}' needs a namespace and a name", name),
                help: None,
            });
        }
        steps.push(Arc::new(InputImageTagStep::new(
            reference.clone().with_alias(name),
            PipelineTag::from(name.as_str()),
            ns,
            clients.images.clone(),
        )));
    }

    for image in &config.images {
        steps.push(Arc::new(ProjectImageStep::new(
            image.from.clone(),
            image.to.clone(),
            image.context_dir.as_deref(),
            ns,
            clients.images.clone(),
            clients.builds.clone(),
        )));
    }

    steps.push(Arc::new(StableImagesStep::new(ns, clients.images.clone())));
    let mut published = Vec::new();
    for image in &config.images {
        let output = OutputImageTagStep::new(
            image.to.clone(),
            ImageTagReference::new(ns, STABLE_IMAGE_STREAM, image.to.as_str()),
            ns,
            clients.images.clone(),
        );
        published.extend(output.creates());
        steps.push(Arc::new(output));
    }

    for (name, pull_spec) in &config.releases {
        steps.push(Arc::new(ReleaseImportStep::new(
            name,
            pull_spec,
            ns,
            clients.images.clone(),
        )));
    }

    // Every producer is known now; tests decide their overrides against it
    let parameters = Parameters::from_steps(&steps);
    let consumed: Arc<dyn ParameterSource> = if overrides.is_empty() {
        Arc::new(parameters.clone())
    } else {
        Arc::new(OverrideParameters::with_values(
            Arc::new(parameters.clone()),
            overrides,
        ))
    };

    for test in &config.tests {
        let step: Arc<dyn Step> = match &test.cluster {
            Some(cluster) => Arc::new(ClusterInstallStep::new(
                cluster.clone(),
                test.clone(),
                ns,
                consumed.clone(),
                clients.images.clone(),
                clients.secrets.clone(),
                clients.tests.clone(),
            )),
            None => Arc::new(TestStep::new(
                test.clone(),
                ns,
                consumed.clone(),
                clients.images.clone(),
                clients.tests.clone(),
            )),
        };
        steps.push(step);
    }

    steps.push(Arc::new(ImagesReadyStep::new(published)));

    tracing::debug!(
        steps = steps.len(),
        parameters = parameters.names().len(),
        "defaulted pipeline from configuration"
    );

    Ok(PipelinePlan { steps, parameters })
}
