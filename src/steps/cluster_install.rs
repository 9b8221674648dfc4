// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Cluster install tests
//!
//! Installs a cluster from the configured profile and runs the test commands
//! against it. Upgrade tests install the `initial` release payload first.

use async_trait::async_trait;
use std::sync::Arc;

use super::TestStep;
use crate::clients::{ImageClient, SecretClient, TestClient};
use crate::errors::{ClientError, StepflowError, StepflowResult};
use crate::pipeline::{
    ClusterTestConfig, OverrideParameters, ParameterMap, ParameterSource, Resolver, Step,
    StepContext, StepLink, TestConfig,
};

pub struct ClusterInstallStep {
    cluster: ClusterTestConfig,
    name: String,
    namespace: String,
    secrets: Arc<dyn SecretClient>,
    test: TestStep,
}

impl ClusterInstallStep {
    pub fn new(
        cluster: ClusterTestConfig,
        config: TestConfig,
        namespace: &str,
        params: Arc<dyn ParameterSource>,
        images: Arc<dyn ImageClient>,
        secrets: Arc<dyn SecretClient>,
        tests: Arc<dyn TestClient>,
    ) -> Self {
        let mut overrides = ParameterMap::new();
        let mut exported = vec!["JOB_NAME_SAFE", "CLUSTER_TYPE", "TEST_COMMAND"];

        if !params.has("JOB_NAME_SAFE") {
            overrides.insert("JOB_NAME_SAFE".into(), Resolver::value(config.name.clone()));
        }
        overrides.insert("TEST_COMMAND".into(), Resolver::value(config.commands.clone()));
        overrides.insert("CLUSTER_TYPE".into(), Resolver::value(cluster_type(&cluster.profile)));

        if cluster.upgrade {
            // the installer must match the initial release
            if !params.has("IMAGE_INSTALLER") {
                overrides.insert(
                    "IMAGE_INSTALLER".into(),
                    Resolver::value("stable-initial:installer"),
                );
            }
            overrides.insert("INSTALL_INITIAL_RELEASE".into(), Resolver::value("true"));
            exported.extend(["RELEASE_IMAGE_INITIAL", "IMAGE_INSTALLER", "INSTALL_INITIAL_RELEASE"]);
        }

        let layered: Arc<dyn ParameterSource> = Arc::new(OverrideParameters::new(params, overrides));
        let name = config.name.clone();
        let test = TestStep::new(config, namespace, layered, images, tests).with_parameters(exported);

        Self {
            cluster,
            name,
            namespace: namespace.to_string(),
            secrets,
            test,
        }
    }

    fn profile_secret(&self) -> String {
        format!("{}-cluster-profile", self.name)
    }
}

/// `gcp-ha` installs a `gcp` cluster
fn cluster_type(profile: &str) -> String {
    profile.split('-').next().unwrap_or(profile).to_string()
}

#[async_trait]
impl Step for ClusterInstallStep {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        if self.cluster.upgrade {
            format!("Run cluster install and upgrade {}", self.name)
        } else {
            format!("Run cluster install {}", self.name)
        }
    }

    fn requires(&self) -> Vec<StepLink> {
        let mut links = self.test.requires();
        if self.cluster.upgrade {
            links.insert(0, StepLink::release_payload_image("initial"));
        }
        links
    }

    fn creates(&self) -> Vec<StepLink> {
        Vec::new()
    }

    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        if dry_run {
            return Ok(());
        }

        self.secrets
            .get_secret(&self.namespace, &self.profile_secret())
            .await
            .map_err(|e| {
                StepflowError::Client(ClientError::Other(format!(
                    "could not find required secret: {}",
                    e
                )))
            })?;

        ctx.info(format!(
            "Installing a {} cluster for {}",
            self.cluster.profile, self.name
        ));
        self.test.run(ctx, dry_run).await
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MemoryCluster;
    use crate::pipeline::{Parameters, PipelineTag};
    use crate::steps::fixtures::{clients, context, NAMESPACE};
    use std::collections::BTreeMap;

    fn test_config() -> TestConfig {
        TestConfig {
            name: "e2e-aws".into(),
            commands: "make e2e".into(),
            from: PipelineTag::source(),
            parameters: Vec::new(),
            cluster: None,
        }
    }

    fn step(cluster: &Arc<MemoryCluster>, params: Parameters, upgrade: bool) -> ClusterInstallStep {
        let clients = clients(cluster);
        ClusterInstallStep::new(
            ClusterTestConfig {
                profile: "aws-ha".into(),
                upgrade,
            },
            test_config(),
            NAMESPACE,
            Arc::new(params),
            clients.images,
            clients.secrets,
            clients.tests,
        )
    }

    #[test]
    fn test_cluster_type_is_profile_prefix() {
        assert_eq!(cluster_type("gcp-ha"), "gcp");
        assert_eq!(cluster_type("aws"), "aws");
    }

    #[test]
    fn test_upgrade_requires_initial_release_first() {
        let cluster = Arc::new(MemoryCluster::new());
        let params = Parameters::new();
        params.add(
            "RELEASE_IMAGE_INITIAL",
            "[release:initial]",
            StepLink::release_payload_image("initial"),
            Resolver::value("quay.io/release:4.1"),
        );

        let install = step(&cluster, params.clone(), false);
        assert_eq!(install.description(), "Run cluster install e2e-aws");
        assert_eq!(install.requires(), vec![StepLink::internal_image("src")]);

        let upgrade = step(&cluster, params, true);
        assert_eq!(
            upgrade.description(),
            "Run cluster install and upgrade e2e-aws"
        );
        assert_eq!(
            upgrade.requires()[0],
            StepLink::release_payload_image("initial")
        );
        assert!(upgrade
            .requires()
            .contains(&StepLink::internal_image("src")));
    }

    #[tokio::test]
    async fn test_missing_profile_secret_fails() {
        let cluster = Arc::new(MemoryCluster::new().with_tag(NAMESPACE, "pipeline", "src", "sha256:src"));
        let install = step(&cluster, Parameters::new(), false);
        let (ctx, _) = context(&install.name());

        let err = install.run(&ctx, false).await.unwrap_err();
        assert!(err.to_string().contains("e2e-aws-cluster-profile"));
        assert!(cluster.tests_run().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_does_nothing() {
        let cluster = Arc::new(MemoryCluster::new());
        let install = step(&cluster, Parameters::new(), false);
        let (ctx, sink) = context(&install.name());

        install.run(&ctx, true).await.unwrap();
        assert!(sink.events().is_empty());
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_exports_override_layer() {
        let mut secret = BTreeMap::new();
        secret.insert("credentials".to_string(), "xyz".to_string());
        let cluster = Arc::new(
            MemoryCluster::new()
                .with_tag(NAMESPACE, "pipeline", "src", "sha256:src")
                .with_secret(NAMESPACE, "e2e-aws-cluster-profile", secret),
        );
        let params = Parameters::new();
        params.add(
            "RELEASE_IMAGE_INITIAL",
            "[release:initial]",
            StepLink::release_payload_image("initial"),
            Resolver::value("quay.io/release:4.1"),
        );
        params.add(
            "JOB_NAME_SAFE",
            "job",
            StepLink::release_payload_image("initial"),
            Resolver::value("from-job"),
        );
        params.mark_satisfied(&[StepLink::release_payload_image("initial")]);

        let upgrade = step(&cluster, params, true);
        let (ctx, _) = context(&upgrade.name());
        upgrade.run(&ctx, false).await.unwrap();

        let env = &cluster.tests_run()[0].env;
        assert_eq!(env["IMAGE_INSTALLER"], "stable-initial:installer");
        assert_eq!(env["INSTALL_INITIAL_RELEASE"], "true");
        assert_eq!(env["RELEASE_IMAGE_INITIAL"], "quay.io/release:4.1");
        assert_eq!(env["JOB_NAME_SAFE"], "from-job");
        assert_eq!(env["CLUSTER_TYPE"], "aws");
        assert_eq!(env["TEST_COMMAND"], "make e2e");
    }
}
