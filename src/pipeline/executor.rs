// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Pipeline executor
//!
//! Runs steps in dependency order. Independent branches run concurrently up
//! to a limit; a failed step blocks its dependents but not unrelated
//! branches, and every failure is reported at the end.

use futures::FutureExt;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::errors::{StepflowError, StepflowResult};
use crate::pipeline::{
    EventSink, ExecutionConfig, NodeId, Parameters, Step, StepContext, StepEvent, StepGraph,
    StepState, TracingSink,
};

/// What happens to independent branches after a step fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep running everything that does not depend on the failure
    #[default]
    ContinueIndependent,
    /// Start nothing new and cancel in-flight steps
    StopOnFirstFailure,
}

/// Pipeline execution options
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Only show what would be done
    pub dry_run: bool,
    /// Only run these steps and their dependencies
    pub targets: Vec<String>,
    /// Maximum number of steps running at once
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            targets: Vec::new(),
            concurrency: 4,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl From<&ExecutionConfig> for ExecutionOptions {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            targets: config.targets.clone(),
            concurrency: config.concurrency,
            failure_policy: if config.fail_fast {
                FailurePolicy::StopOnFirstFailure
            } else {
                FailurePolicy::ContinueIndependent
            },
        }
    }
}

/// How a step ended up in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    /// `done` reported the effect already existed
    AlreadyDone,
    Failed(String),
    /// Not started because these failed steps are upstream of it
    Blocked { by: Vec<String> },
    /// Outside the requested targets
    NotTargeted,
    Cancelled,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::AlreadyDone)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::AlreadyDone => write!(f, "already done"),
            Self::Failed(message) => write!(f, "failed: {}", message),
            Self::Blocked { by } => write!(f, "blocked by {}", by.join(", ")),
            Self::NotTargeted => write!(f, "not targeted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A step that failed, with the dependents it kept from running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: String,
    pub description: String,
    pub message: String,
    pub blocked: Vec<String>,
}

impl StepFailure {
    pub fn into_error(self) -> StepflowError {
        StepflowError::StepFailed {
            step: self.step,
            description: self.description,
            message: self.message,
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({}) failed: {}", self.step, self.description, self.message)?;
        if !self.blocked.is_empty() {
            write!(f, " [blocked: {}]", self.blocked.join(", "))?;
        }
        Ok(())
    }
}

/// Result of executing a pipeline
#[derive(Debug)]
pub struct ExecutionReport {
    /// Outcome per step, in execution order
    pub outcomes: Vec<(String, StepOutcome)>,
    pub failures: Vec<StepFailure>,
    pub duration: Duration,
    /// Whether the caller cancelled the run
    pub cancelled: bool,
}

impl ExecutionReport {
    /// Whether every targeted step succeeded or was already done
    pub fn success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, o)| o.is_success() || *o == StepOutcome::NotTargeted)
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == step)
            .map(|(_, outcome)| outcome)
    }

    /// Steps that were not started because something upstream failed
    pub fn blocked(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, StepOutcome::Blocked { .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    fn count(&self, pred: impl Fn(&StepOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Pipeline executor
pub struct PipelineExecutor {
    events: Arc<dyn EventSink>,
    parameters: Parameters,
}

impl PipelineExecutor {
    /// Create an executor publishing to `parameters` as steps complete
    pub fn new(parameters: Parameters) -> Self {
        Self {
            events: Arc::new(TracingSink),
            parameters,
        }
    }

    /// Send step events to `events` instead of `tracing`
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Execute every node of `graph`
    ///
    /// Dependency configuration errors are returned before anything runs;
    /// step failures are collected in the report.
    pub async fn execute(
        &self,
        graph: &StepGraph,
        options: &ExecutionOptions,
        cancel: &CancellationToken,
    ) -> StepflowResult<ExecutionReport> {
        let start = Instant::now();

        let order = graph.topological_sort()?;
        let selected: Option<BTreeSet<NodeId>> = if options.targets.is_empty() {
            None
        } else {
            Some(graph.dependency_closure(&options.targets)?)
        };

        tracing::info!(
            steps = order.len(),
            dry_run = options.dry_run,
            concurrency = options.concurrency,
            "executing pipeline"
        );

        let mut outcomes: Vec<Option<StepOutcome>> = vec![None; graph.len()];
        let mut started = vec![false; graph.len()];
        if let Some(selected) = &selected {
            for &id in &order {
                if !selected.contains(&id) {
                    outcomes[id] = Some(StepOutcome::NotTargeted);
                }
            }
        }

        let run_token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut tasks: JoinSet<(NodeId, StepOutcome)> = JoinSet::new();
        let mut failures: Vec<StepFailure> = Vec::new();
        let mut halted = false;

        loop {
            // Rescan until no further step settles without running
            let mut settled = true;
            while settled {
                settled = false;
                for &id in &order {
                    if started[id] || outcomes[id].is_some() {
                        continue;
                    }

                    let mut blocked_by: Vec<String> = Vec::new();
                    let mut parent_cancelled = false;
                    let mut ready = true;
                    for parent in graph.parents(id) {
                        match &outcomes[parent] {
                            Some(StepOutcome::Failed(_)) => {
                                push_unique(&mut blocked_by, graph.node_names(&[parent]).remove(0))
                            }
                            Some(StepOutcome::Blocked { by }) => {
                                for name in by {
                                    push_unique(&mut blocked_by, name.clone());
                                }
                            }
                            Some(StepOutcome::Cancelled) => parent_cancelled = true,
                            Some(_) => {}
                            None => ready = false,
                        }
                    }

                    let name = graph.node_names(&[id]).remove(0);
                    if !blocked_by.is_empty() {
                        self.events.emit(StepEvent::Warning {
                            step: name,
                            message: format!(
                                "not started: depends on failed {}",
                                blocked_by.join(", ")
                            ),
                        });
                        outcomes[id] = Some(StepOutcome::Blocked { by: blocked_by });
                        settled = true;
                        continue;
                    }
                    if parent_cancelled || (ready && (halted || run_token.is_cancelled())) {
                        outcomes[id] = Some(StepOutcome::Cancelled);
                        settled = true;
                        continue;
                    }
                    if !ready {
                        continue;
                    }

                    started[id] = true;
                    let step = graph.step(id).clone();
                    let ctx = StepContext::new(&name, run_token.child_token(), self.events.clone());
                    let semaphore = semaphore.clone();
                    let dry_run = options.dry_run;
                    let span = tracing::info_span!("step", name = %name);

                    tasks.spawn(
                        async move {
                            let Ok(_permit) = semaphore.acquire_owned().await else {
                                return (id, StepOutcome::Cancelled);
                            };
                            let outcome = AssertUnwindSafe(run_step(step.as_ref(), &ctx, dry_run))
                                .catch_unwind()
                                .await
                                .unwrap_or_else(|_| {
                                    ctx.transition(StepState::Failed);
                                    StepOutcome::Failed("step panicked".into())
                                });
                            (id, outcome)
                        }
                        .instrument(span),
                    );
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (id, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "step task did not complete");
                    continue;
                }
            };

            let step = graph.step(id);
            match &outcome {
                StepOutcome::Succeeded if options.dry_run => {}
                StepOutcome::Succeeded | StepOutcome::AlreadyDone => {
                    self.parameters.mark_satisfied(&step.creates());
                }
                StepOutcome::Failed(message) => {
                    failures.push(StepFailure {
                        step: graph.node_names(&[id]).remove(0),
                        description: step.description(),
                        message: message.clone(),
                        blocked: Vec::new(),
                    });
                    if options.failure_policy == FailurePolicy::StopOnFirstFailure && !halted {
                        tracing::warn!("stopping after first failure");
                        halted = true;
                        run_token.cancel();
                    }
                }
                _ => {}
            }
            outcomes[id] = Some(outcome);
        }

        let stopped = halted || run_token.is_cancelled();
        let mut unsettled: Vec<StepFailure> = Vec::new();
        let outcomes: Vec<(String, StepOutcome)> = order
            .iter()
            .map(|&id| {
                let name = graph.node_names(&[id]).remove(0);
                let outcome = match outcomes[id].clone() {
                    Some(outcome) => outcome,
                    None if stopped => StepOutcome::Cancelled,
                    None => {
                        let message = if started[id] {
                            "step task did not complete"
                        } else {
                            "step was never scheduled"
                        };
                        tracing::error!(step = %name, "{}", message);
                        unsettled.push(StepFailure {
                            step: name.clone(),
                            description: graph.step(id).description(),
                            message: message.to_string(),
                            blocked: Vec::new(),
                        });
                        StepOutcome::Failed(message.to_string())
                    }
                };
                (name, outcome)
            })
            .collect();
        failures.extend(unsettled);

        for failure in &mut failures {
            failure.blocked = outcomes
                .iter()
                .filter(|(_, o)| matches!(o, StepOutcome::Blocked { by } if by.contains(&failure.step)))
                .map(|(name, _)| name.clone())
                .collect();
        }

        let report = ExecutionReport {
            outcomes,
            failures,
            duration: start.elapsed(),
            cancelled: cancel.is_cancelled(),
        };

        tracing::info!(
            succeeded = report.count(|o| *o == StepOutcome::Succeeded),
            already_done = report.count(|o| *o == StepOutcome::AlreadyDone),
            failed = report.failures.len(),
            blocked = report.blocked().len(),
            cancelled = report.count(|o| *o == StepOutcome::Cancelled),
            duration_ms = report.duration.as_millis() as u64,
            "pipeline finished"
        );

        Ok(report)
    }
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}

/// Apply the per-step protocol: check `done`, then describe inputs and run
async fn run_step(step: &dyn Step, ctx: &StepContext, dry_run: bool) -> StepOutcome {
    if ctx.is_cancelled() {
        return StepOutcome::Cancelled;
    }
    ctx.transition(StepState::Pending);

    let protocol = async {
        match step.done(ctx).await {
            Ok(true) => {
                ctx.transition(StepState::Skip);
                ctx.transition(StepState::Done);
                return Ok(StepOutcome::AlreadyDone);
            }
            Ok(false) => {}
            Err(e) => return Err(format!("could not determine if step is done: {}", e)),
        }

        ctx.transition(StepState::Execute);
        let inputs = step
            .inputs(ctx, dry_run)
            .await
            .map_err(|e| format!("could not resolve inputs: {}", e))?;
        for (key, value) in &inputs {
            tracing::debug!(input = %key, value = %value, "step input");
        }

        step.run(ctx, dry_run).await.map_err(|e| e.to_string())?;
        ctx.transition(StepState::Done);
        Ok::<_, String>(StepOutcome::Succeeded)
    };

    tokio::select! {
        _ = ctx.cancellation.cancelled() => {
            ctx.warn("cancelled while running");
            StepOutcome::Cancelled
        }
        result = protocol => match result {
            Ok(outcome) => outcome,
            Err(message) => {
                ctx.transition(StepState::Failed);
                StepOutcome::Failed(message)
            }
        },
    }
}

/// Build, sort and run `steps`, returning every step failure
pub async fn execute(
    steps: Vec<Arc<dyn Step>>,
    dry_run: bool,
    targets: &[String],
    cancel: &CancellationToken,
) -> StepflowResult<Vec<StepFailure>> {
    let parameters = Parameters::from_steps(&steps);
    let graph = StepGraph::build(steps);
    let options = ExecutionOptions {
        dry_run,
        targets: targets.to_vec(),
        ..ExecutionOptions::default()
    };

    let report = PipelineExecutor::new(parameters)
        .execute(&graph, &options, cancel)
        .await?;
    Ok(report.failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FakeStep, Journal};
    use crate::pipeline::{ParameterMap, ParameterSource, RecordingSink, Resolver, StepLink};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    async fn run(
        steps: Vec<Arc<dyn Step>>,
        options: ExecutionOptions,
    ) -> (ExecutionReport, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let parameters = Parameters::from_steps(&steps);
        let graph = StepGraph::build(steps);
        let report = PipelineExecutor::new(parameters)
            .with_events(sink.clone())
            .execute(&graph, &options, &CancellationToken::new())
            .await
            .unwrap();
        (report, sink)
    }

    #[tokio::test]
    async fn test_partial_failure_blocks_only_dependents() {
        let steps = vec![
            FakeStep::new("A")
                .creates(vec![StepLink::internal_image("a")])
                .fails("boom")
                .build(),
            FakeStep::new("B")
                .requires(vec![StepLink::internal_image("a")])
                .creates(vec![StepLink::internal_image("b")])
                .build(),
            FakeStep::new("D")
                .requires(vec![StepLink::internal_image("b")])
                .build(),
            FakeStep::new("C").build(),
        ];

        let (report, _) = run(steps, ExecutionOptions::default()).await;

        assert!(!report.success());
        assert!(matches!(report.outcome("A"), Some(StepOutcome::Failed(m)) if m.contains("boom")));
        assert_eq!(
            report.outcome("B"),
            Some(&StepOutcome::Blocked { by: vec!["A".into()] })
        );
        assert_eq!(
            report.outcome("D"),
            Some(&StepOutcome::Blocked { by: vec!["A".into()] })
        );
        assert_eq!(report.outcome("C"), Some(&StepOutcome::Succeeded));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "A");
        assert_eq!(report.failures[0].description, "fake step A");
        assert_eq!(report.failures[0].blocked, vec!["B", "D"]);
    }

    #[tokio::test]
    async fn test_every_failure_is_reported() {
        let steps = vec![
            FakeStep::new("x").fails("first").build(),
            FakeStep::new("y").fails("second").build(),
        ];

        let failures = execute(steps, false, &[], &CancellationToken::new())
            .await
            .unwrap();

        let mut failed: Vec<_> = failures.iter().map(|f| f.step.as_str()).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let root_done = Arc::new(AtomicBool::new(false));
        let src_done = Arc::new(AtomicBool::new(false));
        let root_runs = Arc::new(AtomicUsize::new(0));
        let src_runs = Arc::new(AtomicUsize::new(0));

        let steps = || {
            vec![
                FakeStep::new("root")
                    .creates(vec![StepLink::internal_image("root")])
                    .state(root_done.clone())
                    .runs(root_runs.clone())
                    .build(),
                FakeStep::new("src")
                    .requires(vec![StepLink::internal_image("root")])
                    .creates(vec![StepLink::internal_image("src")])
                    .state(src_done.clone())
                    .runs(src_runs.clone())
                    .build(),
            ]
        };

        let (first, _) = run(steps(), ExecutionOptions::default()).await;
        assert!(first.success());

        let (second, sink) = run(steps(), ExecutionOptions::default()).await;
        assert!(second.success());
        assert_eq!(second.outcome("root"), Some(&StepOutcome::AlreadyDone));
        assert_eq!(second.outcome("src"), Some(&StepOutcome::AlreadyDone));
        assert_eq!(root_runs.load(Ordering::SeqCst), 1);
        assert_eq!(src_runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            sink.transitions("src"),
            vec![StepState::Pending, StepState::Skip, StepState::Done]
        );
    }

    #[tokio::test]
    async fn test_done_error_fails_without_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let steps = vec![FakeStep::new("lookup")
            .done_fails("registry unreachable")
            .runs(runs.clone())
            .build()];

        let (report, sink) = run(steps, ExecutionOptions::default()).await;

        assert!(matches!(
            report.outcome("lookup"),
            Some(StepOutcome::Failed(m)) if m.contains("registry unreachable")
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(
            sink.transitions("lookup"),
            vec![StepState::Pending, StepState::Failed]
        );
    }

    #[tokio::test]
    async fn test_targets_limit_execution_to_dependencies() {
        let steps = vec![
            FakeStep::new("root")
                .creates(vec![StepLink::internal_image("root")])
                .build(),
            FakeStep::new("src")
                .requires(vec![StepLink::internal_image("root")])
                .creates(vec![StepLink::internal_image("src")])
                .build(),
            FakeStep::new("other").build(),
        ];
        let options = ExecutionOptions {
            targets: vec!["src".into()],
            ..ExecutionOptions::default()
        };

        let (report, _) = run(steps, options).await;

        assert!(report.success());
        assert_eq!(report.outcome("root"), Some(&StepOutcome::Succeeded));
        assert_eq!(report.outcome("src"), Some(&StepOutcome::Succeeded));
        assert_eq!(report.outcome("other"), Some(&StepOutcome::NotTargeted));
    }

    #[tokio::test]
    async fn test_unsatisfiable_graph_runs_nothing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let steps = vec![
            FakeStep::new("fine").runs(runs.clone()).build(),
            FakeStep::new("stuck")
                .requires(vec![StepLink::internal_image("foo")])
                .build(),
        ];

        let err = execute(steps, false, &[], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StepflowError::MissingDependencies { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let runs = Arc::new(AtomicUsize::new(0));
        let steps = vec![FakeStep::new("a").runs(runs.clone()).build()];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let graph = StepGraph::build(steps);
        let report = PipelineExecutor::new(Parameters::new())
            .execute(&graph, &ExecutionOptions::default(), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.outcome("a"), Some(&StepOutcome::Cancelled));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_on_first_failure() {
        let steps = || {
            vec![
                FakeStep::new("broken").fails("boom").build(),
                FakeStep::new("slow")
                    .creates(vec![StepLink::internal_image("slow")])
                    .delay(Duration::from_millis(300))
                    .build(),
                FakeStep::new("after-slow")
                    .requires(vec![StepLink::internal_image("slow")])
                    .build(),
            ]
        };

        let (report, _) = run(steps(), ExecutionOptions::default()).await;
        assert_eq!(report.outcome("after-slow"), Some(&StepOutcome::Succeeded));

        let options = ExecutionOptions {
            failure_policy: FailurePolicy::StopOnFirstFailure,
            ..ExecutionOptions::default()
        };
        let (report, _) = run(steps(), options).await;
        assert!(matches!(report.outcome("broken"), Some(StepOutcome::Failed(_))));
        assert_eq!(report.outcome("slow"), Some(&StepOutcome::Cancelled));
        assert_eq!(report.outcome("after-slow"), Some(&StepOutcome::Cancelled));
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_independent_steps_run_concurrently() {
        let journal = Journal::default();
        let steps = vec![
            FakeStep::new("a")
                .delay(Duration::from_millis(100))
                .journal(journal.clone())
                .build(),
            FakeStep::new("b")
                .delay(Duration::from_millis(100))
                .journal(journal.clone())
                .build(),
        ];
        let options = ExecutionOptions {
            concurrency: 2,
            ..ExecutionOptions::default()
        };

        let (report, _) = run(steps, options).await;
        assert!(report.success());

        let first_end = journal
            .entries()
            .iter()
            .position(|e| e.starts_with("end:"))
            .unwrap();
        assert_eq!(first_end, 2, "{:?}", journal.entries());
    }

    #[tokio::test]
    async fn test_concurrency_limit_of_one_serializes() {
        let journal = Journal::default();
        let steps = vec![
            FakeStep::new("a")
                .delay(Duration::from_millis(20))
                .journal(journal.clone())
                .build(),
            FakeStep::new("b")
                .delay(Duration::from_millis(20))
                .journal(journal.clone())
                .build(),
        ];
        let options = ExecutionOptions {
            concurrency: 1,
            ..ExecutionOptions::default()
        };

        run(steps, options).await;

        let entries = journal.entries();
        assert!(entries[0].starts_with("start:"));
        assert!(entries[1].starts_with("end:"));
        assert!(entries[2].starts_with("start:"));
    }

    #[tokio::test]
    async fn test_producer_completion_releases_parameters() {
        let mut provided = ParameterMap::new();
        provided.insert("IMAGE_CLI".into(), Resolver::value("registry/stable:cli"));
        let steps = vec![FakeStep::new("cli")
            .creates(vec![StepLink::internal_image("cli")])
            .provides(provided, StepLink::internal_image("cli"))
            .build()];

        let parameters = Parameters::from_steps(&steps);
        assert!(parameters.get("IMAGE_CLI").await.is_err());

        let graph = StepGraph::build(steps);
        let executor = PipelineExecutor::new(parameters);
        executor
            .execute(&graph, &ExecutionOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            executor.parameters().get("IMAGE_CLI").await.unwrap(),
            "registry/stable:cli"
        );
    }

    #[tokio::test]
    async fn test_dry_run_does_not_mark_done() {
        let done = Arc::new(AtomicBool::new(false));
        let steps = vec![FakeStep::new("a").state(done.clone()).build()];

        let failures = execute(steps, true, &[], &CancellationToken::new())
            .await
            .unwrap();

        assert!(failures.is_empty());
        assert!(!done.load(Ordering::SeqCst));

        let mut provided = ParameterMap::new();
        provided.insert("IMAGE_A".into(), Resolver::value("registry/stable:a"));
        let steps = vec![FakeStep::new("a")
            .creates(vec![StepLink::internal_image("a")])
            .provides(provided, StepLink::internal_image("a"))
            .build()];
        let parameters = Parameters::from_steps(&steps);
        let graph = StepGraph::build(steps);
        let executor = PipelineExecutor::new(parameters);
        let options = ExecutionOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = executor
            .execute(&graph, &options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome("a"), Some(&StepOutcome::Succeeded));
        assert!(matches!(
            executor.parameters().get("IMAGE_A").await,
            Err(StepflowError::ParameterNotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_blocks_consumer_of_link_with_two_creators() {
        // `x` comes from B and from C, and C waits on the failing D
        let steps = vec![
            FakeStep::new("A")
                .requires(vec![StepLink::internal_image("x")])
                .build(),
            FakeStep::new("B")
                .creates(vec![StepLink::internal_image("x")])
                .build(),
            FakeStep::new("C")
                .requires(vec![StepLink::internal_image("d")])
                .creates(vec![StepLink::internal_image("x")])
                .build(),
            FakeStep::new("D")
                .creates(vec![StepLink::internal_image("d")])
                .delay(Duration::from_millis(50))
                .fails("boom")
                .build(),
        ];

        let (report, _) = run(steps, ExecutionOptions::default()).await;

        assert_eq!(report.outcome("B"), Some(&StepOutcome::Succeeded));
        assert_eq!(
            report.outcome("C"),
            Some(&StepOutcome::Blocked { by: vec!["D".into()] })
        );
        assert_eq!(
            report.outcome("A"),
            Some(&StepOutcome::Blocked { by: vec!["D".into()] })
        );
        assert_eq!(report.count(|o| *o == StepOutcome::Cancelled), 0);
        assert!(!report.cancelled);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "D");
        assert_eq!(report.failures[0].blocked, vec!["C", "A"]);
    }
}
