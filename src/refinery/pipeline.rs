// SPDX-License-Identifier: MIT

//! Ordered stage execution for one pass

use crate::refinery::engine::EngineEvent;
use crate::refinery::stage::{Stage, StageUpdate};
use crate::refinery::state::WorkflowState;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One position in the pipeline
pub enum Step {
    /// A stage run on its own
    Single(Arc<dyn Stage>),
    /// Stages that read disjoint fields, run concurrently against the same
    /// snapshot and merged in declared order
    Parallel(Vec<Arc<dyn Stage>>),
}

/// Observers and controls for a pass
#[derive(Default, Clone)]
pub struct RunContext {
    pub events: Option<mpsc::Sender<EngineEvent>>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RunContext {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Never waits on the observer: a full or closed channel drops the event
    pub(crate) async fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    log::debug!("Event channel full, dropping {:?}", event)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

/// What happened during one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassSummary {
    pub stages_run: usize,
    /// Names of stages that returned a degraded update
    pub degraded: Vec<String>,
    /// The pass stopped early because cancellation was requested
    pub cancelled: bool,
}

/// Fixed, ordered sequence of stages
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Step>,
    stage_timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn then(mut self, stage: Arc<dyn Stage>) -> Self {
        self.steps.push(Step::Single(stage));
        self
    }

    /// Append a group of independent stages
    pub fn parallel(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
        if !stages.is_empty() {
            self.steps.push(Step::Parallel(stages));
        }
        self
    }

    /// Bound each stage's execution; an overrun becomes a degraded update
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|step| match step {
                Step::Single(stage) => vec![stage.name()],
                Step::Parallel(stages) => stages.iter().map(|s| s.name()).collect(),
            })
            .collect()
    }

    /// Run one pass with no observers
    pub async fn run(&self, state: &mut WorkflowState) -> PassSummary {
        self.run_with(state, &RunContext::default()).await
    }

    /// Run one pass, applying each step's update before the next step starts
    pub async fn run_with(&self, state: &mut WorkflowState, ctx: &RunContext) -> PassSummary {
        let mut summary = PassSummary::default();

        for step in &self.steps {
            if ctx.cancelled() {
                log::warn!("Cancellation requested, stopping before next stage");
                summary.cancelled = true;
                break;
            }

            let stages: Vec<&Arc<dyn Stage>> = match step {
                Step::Single(stage) => vec![stage],
                Step::Parallel(stages) => stages.iter().collect(),
            };

            for stage in &stages {
                ctx.emit(EngineEvent::StageStarted {
                    iteration: state.iteration(),
                    stage: stage.name().to_string(),
                })
                .await;
            }

            let snapshot: &WorkflowState = state;
            let results = join_all(
                stages
                    .iter()
                    .map(|stage| self.execute_stage(stage.as_ref(), snapshot)),
            )
            .await;

            // Fan-in in declared order so the merge is deterministic
            for (stage, (update, elapsed)) in stages.iter().zip(results) {
                let degraded = update.is_degraded();
                if degraded {
                    summary.degraded.push(stage.name().to_string());
                }
                update.apply_to(stage.name(), state);
                summary.stages_run += 1;

                log::info!(
                    "Stage {} finished in {:?}{}",
                    stage.name(),
                    elapsed,
                    if degraded { " (degraded)" } else { "" }
                );
                ctx.emit(EngineEvent::StageFinished {
                    iteration: state.iteration(),
                    stage: stage.name().to_string(),
                    degraded,
                    elapsed_ms: elapsed.as_millis() as u64,
                })
                .await;
            }
        }

        summary
    }

    async fn execute_stage(
        &self,
        stage: &dyn Stage,
        state: &WorkflowState,
    ) -> (StageUpdate, Duration) {
        log::info!("Executing stage: {}", stage.name());
        let started = Instant::now();

        let update = match self.stage_timeout {
            Some(limit) => match tokio::time::timeout(limit, stage.execute(state)).await {
                Ok(update) => update,
                Err(_) => StageUpdate::new()
                    .error(format!("{}: timed out after {:?}", stage.name(), limit)),
            },
            None => stage.execute(state).await,
        };

        (update, started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Appends its own name to `trace` and records what it saw there
    struct TraceStage {
        name: String,
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl TraceStage {
        fn new(name: &str) -> (Arc<dyn Stage>, Arc<Mutex<Vec<usize>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Arc::new(Self {
                    name: name.to_string(),
                    seen: seen.clone(),
                }),
                seen,
            )
        }
    }

    #[async_trait]
    impl Stage for TraceStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, state: &WorkflowState) -> StageUpdate {
            self.seen.lock().unwrap().push(state.len_of("trace"));
            StageUpdate::new().append("trace", json!(self.name))
        }
    }

    struct SlowStage;

    #[async_trait]
    impl Stage for SlowStage {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _state: &WorkflowState) -> StageUpdate {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StageUpdate::new().set("never", json!(true))
        }
    }

    #[tokio::test]
    async fn test_later_stages_observe_earlier_output() {
        let (a, seen_a) = TraceStage::new("a");
        let (b, seen_b) = TraceStage::new("b");
        let pipeline = Pipeline::new().then(a).then(b);

        let mut state = WorkflowState::empty("q", 1);
        let summary = pipeline.run(&mut state).await;

        assert_eq!(summary.stages_run, 2);
        assert_eq!(*seen_a.lock().unwrap(), vec![0]);
        assert_eq!(*seen_b.lock().unwrap(), vec![1]);
        assert_eq!(state.get("trace"), Some(&json!(["a", "b"])));
    }

    #[tokio::test]
    async fn test_parallel_group_sees_same_snapshot_and_merges_in_order() {
        let (first, _) = TraceStage::new("first");
        let (x, seen_x) = TraceStage::new("x");
        let (y, seen_y) = TraceStage::new("y");
        let (last, seen_last) = TraceStage::new("last");
        let pipeline = Pipeline::new()
            .then(first)
            .parallel(vec![x, y])
            .then(last);

        assert_eq!(pipeline.stage_names(), vec!["first", "x", "y", "last"]);

        let mut state = WorkflowState::empty("q", 1);
        pipeline.run(&mut state).await;

        assert_eq!(*seen_x.lock().unwrap(), vec![1]);
        assert_eq!(*seen_y.lock().unwrap(), vec![1]);
        assert_eq!(*seen_last.lock().unwrap(), vec![3]);
        assert_eq!(state.get("trace"), Some(&json!(["first", "x", "y", "last"])));
    }

    #[tokio::test]
    async fn test_stage_timeout_degrades() {
        let pipeline = Pipeline::new()
            .then(Arc::new(SlowStage))
            .with_stage_timeout(Duration::from_millis(20));

        let mut state = WorkflowState::empty("q", 1);
        let summary = pipeline.run(&mut state).await;

        assert_eq!(summary.degraded, vec!["slow"]);
        assert!(state.get("never").is_none());
        assert!(state.errors()[0].starts_with("slow: timed out"));
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_stage() {
        let (a, seen_a) = TraceStage::new("a");
        let cancel = Arc::new(AtomicBool::new(true));
        let ctx = RunContext {
            events: None,
            cancel: Some(cancel),
        };

        let mut state = WorkflowState::empty("q", 1);
        let summary = Pipeline::new().then(a).run_with(&mut state, &ctx).await;

        assert!(summary.cancelled);
        assert_eq!(summary.stages_run, 0);
        assert!(seen_a.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undrained_observer_does_not_stall_the_pass() {
        let (a, _) = TraceStage::new("a");
        let (b, _) = TraceStage::new("b");
        let (tx, mut rx) = mpsc::channel(1);
        let ctx = RunContext {
            events: Some(tx),
            cancel: None,
        };

        let mut state = WorkflowState::empty("q", 1);
        let summary = tokio::time::timeout(
            Duration::from_secs(1),
            Pipeline::new().then(a).then(b).run_with(&mut state, &ctx),
        )
        .await
        .expect("pass should not wait on the event channel");
        drop(ctx);

        assert_eq!(summary.stages_run, 2);
        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::StageStarted { .. })
        ));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_events_are_emitted_per_stage() {
        let (a, _) = TraceStage::new("a");
        let (tx, mut rx) = mpsc::channel(16);
        let ctx = RunContext {
            events: Some(tx),
            cancel: None,
        };

        let mut state = WorkflowState::empty("q", 1);
        Pipeline::new().then(a).run_with(&mut state, &ctx).await;
        drop(ctx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events[0], EngineEvent::StageStarted { .. }));
        assert!(matches!(
            events[1],
            EngineEvent::StageFinished { degraded: false, .. }
        ));
    }
}
