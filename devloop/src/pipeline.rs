//! Pipeline engine: drives the stage graph from entry to terminal.
//!
//! The engine invokes one stage at a time, merges its update into the run
//! state and follows the outgoing edge. The single conditional edge consults
//! the injected [`Router`], but the engine keeps its own loop-back counter and
//! forces `approve` once `max_revisions` loop-backs have happened, so no
//! router can keep a run alive forever.

use std::fmt;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::graph::{self, ENTRY, Edge};
use crate::core::routing::{Router, route_after_review};
use crate::core::state::PipelineState;
use crate::core::types::{LogEntry, RoutingDecision, StageId};
use crate::stages::Stages;

/// The run was started with an empty or whitespace-only task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyTask;

impl fmt::Display for EmptyTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task must not be empty")
    }
}

impl std::error::Error for EmptyTask {}

/// A stage could not produce an update; the run was aborted.
#[derive(Debug)]
pub struct StageFailed {
    pub stage: StageId,
    pub cause: anyhow::Error,
}

impl fmt::Display for StageFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage '{}' failed", self.stage)
    }
}

impl std::error::Error for StageFailed {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

pub struct Pipeline {
    stages: Stages,
    max_revisions: u32,
    router: Router,
}

impl Pipeline {
    pub fn new(stages: Stages, max_revisions: u32) -> Self {
        Self {
            stages,
            max_revisions,
            router: route_after_review,
        }
    }

    /// Replace the routing predicate. The loop-back bound still applies.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn max_revisions(&self) -> u32 {
        self.max_revisions
    }

    /// Run `task` through the graph and return the final state.
    pub fn run(&self, task: &str) -> Result<PipelineState> {
        self.run_with(task, |_| {})
    }

    /// Like [`Pipeline::run`], calling `on_stage` with each new log entry.
    #[instrument(skip_all, fields(max_revisions = self.max_revisions))]
    pub fn run_with<F: FnMut(&LogEntry)>(
        &self,
        task: &str,
        mut on_stage: F,
    ) -> Result<PipelineState> {
        if task.trim().is_empty() {
            return Err(EmptyTask.into());
        }

        let mut state = PipelineState::new(task);
        let mut loopbacks = 0u32;
        let mut current = ENTRY;
        info!(stage = %current, "pipeline started");

        loop {
            debug!(stage = %current, iteration = state.iteration_count(), "running stage");
            let update = self
                .stages
                .get(current)
                .run(&state)
                .map_err(|cause| {
                    warn!(stage = %current, err = ?cause, "stage failed, aborting run");
                    StageFailed {
                        stage: current,
                        cause,
                    }
                })?;
            let entry = state.apply(current, update);
            info!(stage = %current, message = %entry.message, "stage finished");
            on_stage(entry);

            let edge = graph::edge(current);
            let decision = match edge {
                Edge::Branch { .. } => self.decide(&state, &mut loopbacks),
                Edge::Static(_) | Edge::Terminal => RoutingDecision::Approve,
            };
            match edge.select(decision) {
                Some(next) => current = next,
                None => break,
            }
        }

        info!(
            iterations = state.iteration_count(),
            loopbacks,
            stages_run = state.activity_log().len(),
            "pipeline finished"
        );
        Ok(state)
    }

    fn decide(&self, state: &PipelineState, loopbacks: &mut u32) -> RoutingDecision {
        let severity = state.review_verdict().severity();
        let proposed = (self.router)(severity, *loopbacks, self.max_revisions);
        let decision = if proposed == RoutingDecision::Revise && *loopbacks >= self.max_revisions {
            warn!(
                loopbacks = *loopbacks,
                max_revisions = self.max_revisions,
                "revision bound reached, forcing approve"
            );
            RoutingDecision::Approve
        } else {
            proposed
        };
        if decision == RoutingDecision::Revise {
            *loopbacks += 1;
        }
        info!(
            %severity,
            ?decision,
            revisions = *loopbacks,
            iteration = state.iteration_count(),
            "routed after review"
        );
        decision
    }
}
