// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Builder-based fake steps for unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::{StepflowError, StepflowResult};
use crate::pipeline::{ParameterMap, Step, StepContext, StepLink};

/// Shared record of which steps started and finished, in order
#[derive(Debug, Default, Clone)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

pub struct FakeStep {
    name: String,
    requires: Vec<StepLink>,
    creates: Vec<StepLink>,
    provides: Option<(ParameterMap, StepLink)>,
    fail: Option<String>,
    done_error: Option<String>,
    delay: Option<Duration>,
    done: Arc<AtomicBool>,
    runs: Arc<AtomicUsize>,
    journal: Journal,
}

impl FakeStep {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            requires: Vec::new(),
            creates: Vec::new(),
            provides: None,
            fail: None,
            done_error: None,
            delay: None,
            done: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(AtomicUsize::new(0)),
            journal: Journal::default(),
        }
    }

    pub fn requires(mut self, links: Vec<StepLink>) -> Self {
        self.requires = links;
        self
    }

    pub fn creates(mut self, links: Vec<StepLink>) -> Self {
        self.creates = links;
        self
    }

    pub fn provides(mut self, map: ParameterMap, gate: StepLink) -> Self {
        self.provides = Some((map, gate));
        self
    }

    pub fn fails(mut self, message: &str) -> Self {
        self.fail = Some(message.to_string());
        self
    }

    pub fn done_fails(mut self, message: &str) -> Self {
        self.done_error = Some(message.to_string());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Share the "already done" state, e.g. across two runs
    pub fn state(mut self, done: Arc<AtomicBool>) -> Self {
        self.done = done;
        self
    }

    pub fn runs(mut self, runs: Arc<AtomicUsize>) -> Self {
        self.runs = runs;
        self
    }

    pub fn journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn build(self) -> Arc<dyn Step> {
        Arc::new(self)
    }
}

#[async_trait]
impl Step for FakeStep {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("fake step {}", self.name)
    }

    fn requires(&self) -> Vec<StepLink> {
        self.requires.clone()
    }

    fn creates(&self) -> Vec<StepLink> {
        self.creates.clone()
    }

    fn provides(&self) -> Option<(ParameterMap, StepLink)> {
        self.provides.clone()
    }

    async fn run(&self, _ctx: &StepContext, dry_run: bool) -> StepflowResult<()> {
        self.journal.push(format!("start:{}", self.name));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.journal.push(format!("end:{}", self.name));

        if let Some(message) = &self.fail {
            return Err(StepflowError::Io {
                message: message.clone(),
            });
        }
        if !dry_run {
            self.done.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn done(&self, _ctx: &StepContext) -> StepflowResult<bool> {
        if let Some(message) = &self.done_error {
            return Err(StepflowError::Io {
                message: message.clone(),
            });
        }
        Ok(self.done.load(Ordering::SeqCst))
    }
}
