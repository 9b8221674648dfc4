// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! The step contract
//!
//! Every pipeline stage implements [`Step`]. The engine only ever looks at
//! a step's declared links; what `run` does is opaque to it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::errors::StepflowResult;
use crate::pipeline::{ParameterMap, StepLink};

/// Diagnostic description of what a step consumes
pub type InputDefinition = BTreeMap<String, String>;

/// A unit of pipeline work
#[async_trait]
pub trait Step: Send + Sync {
    /// Human-readable name, unique within a pipeline
    fn name(&self) -> String;

    fn description(&self) -> String;

    /// Links that must be created before this step runs
    fn requires(&self) -> Vec<StepLink>;

    /// Links this step creates once it has run
    fn creates(&self) -> Vec<StepLink>;

    /// Parameters this step exposes and the link gating them
    fn provides(&self) -> Option<(ParameterMap, StepLink)> {
        None
    }

    /// Describe the inputs this step will consume
    async fn inputs(&self, _ctx: &StepContext, _dry_run: bool) -> StepflowResult<InputDefinition> {
        Ok(InputDefinition::new())
    }

    /// Produce the step's effect; in dry-run mode nothing may be mutated
    async fn run(&self, ctx: &StepContext, dry_run: bool) -> StepflowResult<()>;

    /// Whether the effect already exists; may be called more than once
    async fn done(&self, ctx: &StepContext) -> StepflowResult<bool>;
}

/// Observable states of a step during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepState {
    Pending,
    /// `done` reported the effect already exists
    Skip,
    Execute,
    Done,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Skip => "skip",
            Self::Execute => "execute",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Something a step or the driver reports while running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    Transition { step: String, state: StepState },
    Info { step: String, message: String },
    Warning { step: String, message: String },
    /// What a dry run would have applied
    Preview { step: String, content: String },
}

/// Receiver for step events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StepEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: StepEvent) {
        match event {
            StepEvent::Transition { step, state } => {
                tracing::info!(step = %step, state = %state, "step transition")
            }
            StepEvent::Info { step, message } => tracing::info!(step = %step, "{}", message),
            StepEvent::Warning { step, message } => tracing::warn!(step = %step, "{}", message),
            StepEvent::Preview { step, content } => {
                tracing::info!(step = %step, "dry run would apply:\n{}", content)
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StepEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StepEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// States `step` went through, in order
    pub fn transitions(&self, step: &str) -> Vec<StepState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StepEvent::Transition { step: s, state } if s == step => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn previews(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StepEvent::Preview { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: StepEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Per-invocation capabilities handed to a step
#[derive(Clone)]
pub struct StepContext {
    step: String,
    /// Cancelled when the run is aborted
    pub cancellation: CancellationToken,
    events: Arc<dyn EventSink>,
}

impl StepContext {
    pub fn new(step: &str, cancellation: CancellationToken, events: Arc<dyn EventSink>) -> Self {
        Self {
            step: step.to_string(),
            cancellation,
            events,
        }
    }

    /// A context logging through `tracing`, never cancelled
    pub fn detached(step: &str) -> Self {
        Self::new(step, CancellationToken::new(), Arc::new(TracingSink))
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.events.emit(StepEvent::Info {
            step: self.step.clone(),
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.events.emit(StepEvent::Warning {
            step: self.step.clone(),
            message: message.into(),
        });
    }

    pub fn preview(&self, content: impl Into<String>) {
        self.events.emit(StepEvent::Preview {
            step: self.step.clone(),
            content: content.into(),
        });
    }

    pub(crate) fn transition(&self, state: StepState) {
        self.events.emit(StepEvent::Transition {
            step: self.step.clone(),
            state,
        });
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("step", &self.step)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_filters_by_step() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = StepContext::new("src", CancellationToken::new(), sink.clone());
        let other = StepContext::new("bin", CancellationToken::new(), sink.clone());

        ctx.transition(StepState::Pending);
        other.transition(StepState::Pending);
        ctx.transition(StepState::Execute);
        ctx.preview("{}");

        assert_eq!(
            sink.transitions("src"),
            vec![StepState::Pending, StepState::Execute]
        );
        assert_eq!(sink.previews(), vec!["{}"]);
    }

    #[test]
    fn test_context_sees_cancellation() {
        let token = CancellationToken::new();
        let ctx = StepContext::new("src", token.child_token(), Arc::new(TracingSink));
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
