// SPDX-License-Identifier: MIT

//! Bounded reflection loop
//!
//! Runs the pipeline, asks the gate, and either accepts or loops back with
//! the accumulated state. The number of passes never exceeds
//! `max_iterations`: when every pass fails the gate the engine runs exactly
//! `max_iterations` passes and returns with `iteration == max_iterations - 1`.

use crate::adk::error::EngineError;
use crate::refinery::gate::{GateDecision, QualityGate};
use crate::refinery::pipeline::{Pipeline, RunContext};
use crate::refinery::state::{Phase, StateSchema, WorkflowState};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Progress notifications for observers (CLI spinners, logs, tests)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PassStarted {
        iteration: u32,
    },
    StageStarted {
        iteration: u32,
        stage: String,
    },
    StageFinished {
        iteration: u32,
        stage: String,
        degraded: bool,
        elapsed_ms: u64,
    },
    GateDecided {
        iteration: u32,
        score: f64,
        decision: GateDecision,
    },
    Finished {
        phase: Phase,
        iteration: u32,
        score: f64,
    },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_iterations: 2 }
    }
}

/// Per-call overrides and observers
#[derive(Default)]
pub struct RunOptions {
    pub max_iterations: Option<u32>,
    pub events: Option<mpsc::Sender<EngineEvent>>,
    pub cancel: Option<Arc<AtomicBool>>,
}

pub type Preflight = Box<dyn Fn() -> Result<(), EngineError> + Send + Sync>;

pub struct Engine {
    pipeline: Pipeline,
    gate: Box<dyn QualityGate>,
    schema: StateSchema,
    config: EngineConfig,
    preflight: Option<Preflight>,
}

impl Engine {
    pub fn new(pipeline: Pipeline, gate: impl QualityGate + 'static) -> Self {
        Self {
            pipeline,
            gate: Box::new(gate),
            schema: StateSchema::default(),
            config: EngineConfig::default(),
            preflight: None,
        }
    }

    /// Declare reducers for the state created by each run
    pub fn with_schema(mut self, schema: StateSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Check run before the first pass; an error fails the run without
    /// invoking any stage
    pub fn with_preflight(
        mut self,
        check: impl Fn() -> Result<(), EngineError> + Send + Sync + 'static,
    ) -> Self {
        self.preflight = Some(Box::new(check));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn run(&self, query: &str) -> WorkflowState {
        self.run_with(query, RunOptions::default()).await
    }

    pub async fn run_with(&self, query: &str, options: RunOptions) -> WorkflowState {
        let max_iterations = options
            .max_iterations
            .unwrap_or(self.config.max_iterations);
        let mut state = WorkflowState::new(query, max_iterations, &self.schema);
        let ctx = RunContext {
            events: options.events,
            cancel: options.cancel,
        };

        log::info!(
            "Starting run {} (max {} passes, gate: {}): {}",
            state.run_id(),
            state.max_iterations(),
            self.gate.describe(),
            query
        );

        if let Err(e) = self.setup_check() {
            log::error!("Run {} failed during setup: {}", state.run_id(), e);
            state.push_error(format!("Engine: {}", e));
            state.set_phase(Phase::Failed);
            state.set_status("Failed");
            self.finish(&state, &ctx).await;
            return state;
        }

        let mut passes = 0;
        loop {
            passes += 1;
            state.set_phase(Phase::Running);
            log::info!(
                "Pass {}/{} (iteration {})",
                passes,
                state.max_iterations(),
                state.iteration()
            );
            ctx.emit(EngineEvent::PassStarted {
                iteration: state.iteration(),
            })
            .await;

            let summary = self.pipeline.run_with(&mut state, &ctx).await;
            if !summary.degraded.is_empty() {
                log::warn!(
                    "Pass {} completed with degraded stages: {}",
                    passes,
                    summary.degraded.join(", ")
                );
            }

            if summary.cancelled {
                state.push_error(format!(
                    "Engine: cancelled after {} stages in pass {}",
                    summary.stages_run, passes
                ));
                state.set_phase(Phase::Accepted);
                state.set_status("Cancelled");
                break;
            }

            let decision = self.gate.decide(&state);
            log::info!(
                "Gate decided {:?} at score {:.1} (iteration {}/{})",
                decision,
                state.score(),
                state.iteration(),
                state.max_iterations()
            );
            ctx.emit(EngineEvent::GateDecided {
                iteration: state.iteration(),
                score: state.score(),
                decision,
            })
            .await;

            match decision {
                GateDecision::Accept => {
                    state.set_phase(Phase::Accepted);
                    break;
                }
                GateDecision::Refine if passes >= state.max_iterations() => {
                    log::warn!(
                        "Gate asked for refinement at the ceiling ({} passes), accepting",
                        passes
                    );
                    state.set_phase(Phase::Accepted);
                    break;
                }
                GateDecision::Refine => {
                    state.advance_iteration();
                    state.set_phase(Phase::Refining);
                    state.set_status(format!("Refining (iteration {})", state.iteration()));
                }
            }
        }

        self.finish(&state, &ctx).await;
        state
    }

    fn setup_check(&self) -> Result<(), EngineError> {
        if self.pipeline.is_empty() {
            return Err(EngineError::EmptyPipeline);
        }
        match &self.preflight {
            Some(check) => check(),
            None => Ok(()),
        }
    }

    async fn finish(&self, state: &WorkflowState, ctx: &RunContext) {
        log::info!(
            "Run {} finished: {:?} at iteration {} with score {:.1} ({} errors, {} tokens)",
            state.run_id(),
            state.phase(),
            state.iteration(),
            state.score(),
            state.errors().len(),
            state.usage().total_tokens()
        );
        ctx.emit(EngineEvent::Finished {
            phase: state.phase(),
            iteration: state.iteration(),
            score: state.score(),
        })
        .await;
    }
}
