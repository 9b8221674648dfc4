// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Parameter propagation
//!
//! Steps expose computed values to later steps through lazily evaluated
//! resolvers. A resolver may only run once the step creating its gating link
//! has finished, and its value is memoized after the first success.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::OnceCell;

use crate::errors::{StepflowError, StepflowResult};
use crate::pipeline::{has_all_links, Step, StepLink};

/// A deferred, possibly failing, value lookup
#[derive(Clone)]
pub struct Resolver(Arc<dyn Fn() -> BoxFuture<'static, StepflowResult<String>> + Send + Sync>);

impl Resolver {
    /// Wrap an async lookup
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepflowResult<String>> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(f())))
    }

    /// A resolver that always yields `value`
    pub fn value(value: impl Into<String>) -> Self {
        let value = value.into();
        Self::new(move || {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    pub async fn resolve(&self) -> StepflowResult<String> {
        (self.0)().await
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Resolver(..)")
    }
}

/// Parameter name to resolver
pub type ParameterMap = BTreeMap<String, Resolver>;

/// Read access to a parameter namespace
#[async_trait]
pub trait ParameterSource: Send + Sync {
    /// Whether `name` can be looked up here
    fn has(&self, name: &str) -> bool;

    /// Links a consumer must require before looking up `name`
    fn links(&self, name: &str) -> Vec<StepLink>;

    /// Resolve `name`
    async fn get(&self, name: &str) -> StepflowResult<String>;
}

#[async_trait]
impl ParameterSource for ParameterMap {
    fn has(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn links(&self, _name: &str) -> Vec<StepLink> {
        Vec::new()
    }

    async fn get(&self, name: &str) -> StepflowResult<String> {
        match BTreeMap::get(self, name) {
            Some(resolver) => resolver.resolve().await,
            None => Err(StepflowError::UnknownParameter {
                name: name.to_string(),
            }),
        }
    }
}

#[derive(Clone)]
struct Entry {
    producer: String,
    gate: StepLink,
    resolver: Resolver,
    value: Arc<OnceCell<String>>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    satisfied: Vec<StepLink>,
}

/// The aggregated namespace of every step's provided parameters
///
/// Cloning yields another handle to the same namespace, so consumers can be
/// handed a `Parameters` before the producers are registered.
#[derive(Clone, Default)]
pub struct Parameters {
    inner: Arc<RwLock<Inner>>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate the provided parameters of `steps`; later steps win collisions
    pub fn from_steps(steps: &[Arc<dyn Step>]) -> Self {
        let params = Self::new();
        params.add_steps(steps);
        params
    }

    /// Register the provided parameters of `steps`
    pub fn add_steps(&self, steps: &[Arc<dyn Step>]) {
        for step in steps {
            if let Some((map, gate)) = step.provides() {
                self.add_map(&step.name(), map, gate);
            }
        }
    }

    /// Register every entry of `map` as produced by `producer`
    pub fn add_map(&self, producer: &str, map: ParameterMap, gate: StepLink) {
        for (name, resolver) in map {
            self.add(name, producer, gate.clone(), resolver);
        }
    }

    /// Register a single parameter, replacing any previous producer
    pub fn add(&self, name: impl Into<String>, producer: &str, gate: StepLink, resolver: Resolver) {
        let name = name.into();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = inner.entries.get(&name) {
            tracing::debug!(
                parameter = %name,
                previous = %previous.producer,
                producer = %producer,
                "parameter provided by more than one step"
            );
        }
        inner.entries.insert(
            name,
            Entry {
                producer: producer.to_string(),
                gate,
                resolver,
                value: Arc::new(OnceCell::new()),
            },
        );
    }

    /// Record that the producers of `links` have finished
    pub fn mark_satisfied(&self, links: &[StepLink]) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.satisfied.extend_from_slice(links);
    }

    /// Parameter names in sorted order
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.keys().cloned().collect()
    }

    /// The step currently registered as producer of `name`
    pub fn producer(&self, name: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(name).map(|entry| entry.producer.clone())
    }

    fn entry(&self, name: &str) -> StepflowResult<(Entry, bool)> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entry = inner
            .entries
            .get(name)
            .cloned()
            .ok_or_else(|| StepflowError::UnknownParameter {
                name: name.to_string(),
            })?;
        let ready = has_all_links(std::slice::from_ref(&entry.gate), &inner.satisfied);
        Ok((entry, ready))
    }
}

#[async_trait]
impl ParameterSource for Parameters {
    fn has(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.contains_key(name)
    }

    fn links(&self, name: &str) -> Vec<StepLink> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .get(name)
            .map(|entry| vec![entry.gate.clone()])
            .unwrap_or_default()
    }

    async fn get(&self, name: &str) -> StepflowResult<String> {
        let (entry, ready) = self.entry(name)?;
        if !ready {
            return Err(StepflowError::ParameterNotReady {
                name: name.to_string(),
                producer: entry.producer,
            });
        }

        let value = entry
            .value
            .get_or_try_init(|| entry.resolver.resolve())
            .await
            .map_err(|e| StepflowError::ResolverFailed {
                name: name.to_string(),
                producer: entry.producer.clone(),
                message: e.to_string(),
            })?;
        Ok(value.clone())
    }
}

/// A layer of fixed or alternate values shadowing a base namespace
pub struct OverrideParameters {
    base: Arc<dyn ParameterSource>,
    overrides: ParameterMap,
}

impl OverrideParameters {
    pub fn new(base: Arc<dyn ParameterSource>, overrides: ParameterMap) -> Self {
        Self { base, overrides }
    }

    /// Shadow `base` with fixed string values
    pub fn with_values(base: Arc<dyn ParameterSource>, values: &BTreeMap<String, String>) -> Self {
        let overrides = values
            .iter()
            .map(|(name, value)| (name.clone(), Resolver::value(value.clone())))
            .collect();
        Self::new(base, overrides)
    }

    /// Names this layer shadows
    pub fn overridden(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }
}

#[async_trait]
impl ParameterSource for OverrideParameters {
    fn has(&self, name: &str) -> bool {
        self.overrides.contains_key(name) || self.base.has(name)
    }

    fn links(&self, name: &str) -> Vec<StepLink> {
        if self.overrides.contains_key(name) {
            Vec::new()
        } else {
            self.base.links(name)
        }
    }

    async fn get(&self, name: &str) -> StepflowResult<String> {
        match self.overrides.get(name) {
            Some(resolver) => resolver.resolve().await,
            None => self.base.get(name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_resolver(calls: Arc<AtomicUsize>, value: &'static str) -> Resolver {
        Resolver::new(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value.to_string())
            }
        })
    }

    #[tokio::test]
    async fn test_override_shadows_base() {
        let mut base = ParameterMap::new();
        base.insert("X".into(), Resolver::value("1"));
        base.insert("Y".into(), Resolver::value("base-y"));

        let mut values = BTreeMap::new();
        values.insert("X".to_string(), "2".to_string());
        let layered = OverrideParameters::with_values(Arc::new(base), &values);

        assert_eq!(layered.get("X").await.unwrap(), "2");
        assert_eq!(layered.get("Y").await.unwrap(), "base-y");
        assert!(matches!(
            layered.get("Z").await,
            Err(StepflowError::UnknownParameter { .. })
        ));
        assert_eq!(layered.overridden().collect::<Vec<_>>(), vec!["X"]);
    }

    #[tokio::test]
    async fn test_gate_must_be_satisfied_before_resolving() {
        let calls = Arc::new(AtomicUsize::new(0));
        let params = Parameters::new();
        params.add(
            "IMAGE_CLI",
            "[output:stable:cli]",
            StepLink::internal_image("cli"),
            counting_resolver(calls.clone(), "registry/stable:cli"),
        );

        let err = params.get("IMAGE_CLI").await.unwrap_err();
        assert!(matches!(err, StepflowError::ParameterNotReady { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        params.mark_satisfied(&[StepLink::internal_image("cli")]);
        assert_eq!(params.get("IMAGE_CLI").await.unwrap(), "registry/stable:cli");
        assert_eq!(params.get("IMAGE_CLI").await.unwrap(), "registry/stable:cli");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolver_failure_names_parameter_and_producer() {
        let params = Parameters::new();
        params.add(
            "IMAGE_CLI",
            "cli-step",
            StepLink::ImagesReady,
            Resolver::new(|| async {
                Err(StepflowError::InvalidConfig {
                    reason: "no registry".into(),
                    help: None,
                })
            }),
        );
        params.mark_satisfied(&[StepLink::ImagesReady]);

        match params.get("IMAGE_CLI").await.unwrap_err() {
            StepflowError::ResolverFailed { name, producer, .. } => {
                assert_eq!(name, "IMAGE_CLI");
                assert_eq!(producer, "cli-step");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let params = Parameters::new();
        params.add("X", "first", StepLink::ImagesReady, Resolver::value("1"));
        params.add("X", "second", StepLink::ImagesReady, Resolver::value("2"));
        params.mark_satisfied(&[StepLink::ImagesReady]);

        assert_eq!(params.producer("X").as_deref(), Some("second"));
        assert_eq!(params.get("X").await.unwrap(), "2");
        assert_eq!(params.links("X"), vec![StepLink::ImagesReady]);
    }

    #[tokio::test]
    async fn test_overridden_names_have_no_gating_links() {
        let params = Parameters::new();
        params.add("X", "producer", StepLink::ImagesReady, Resolver::value("1"));

        let mut values = BTreeMap::new();
        values.insert("X".to_string(), "fixed".to_string());
        let layered = OverrideParameters::with_values(Arc::new(params.clone()), &values);

        assert!(layered.links("X").is_empty());
        assert_eq!(layered.get("X").await.unwrap(), "fixed");
    }
}
