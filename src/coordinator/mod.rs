//! Multi-agent coordination.
//!
//! A [`Coordinator`] resolves the agent units for a request, runs any
//! retrieval unit first, then executes the remaining units under one of the
//! four [`CoordinationMode`]s. Every run owns its own [`SharedContext`];
//! nothing is carried across runs.

mod modes;
mod types;


use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub use types::{
    AgentInteraction, AgentResponse, CoordinationMode, CoordinationOutcome, CoordinationRequest,
    InteractionKind, NoProgress, PriorOutput, ProgressSink,
};

use crate::agents::{
    AgentError, AgentRegistry, AgentRouter, AgentUnit, Backends, FailureKind, UnitInput, UnitOutput,
};
use crate::context::{ContextBuilder, ContextEntry, ContextLimits, SharedContext};
use crate::error::CoordinationError;
use crate::retrieval::Snippet;

/// A transient unit failure is retried this many times before it counts.
pub const RETRIES_PER_UNIT: u32 = 1;

/// Debate runs with at most this many participants.
pub const DEBATE_PARTICIPANTS: usize = 3;

/// Tuning for coordination runs.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Units picked by automatic routing.
    pub max_units: usize,
    pub min_confidence: f32,
    /// Concurrent backend calls allowed within one run.
    pub max_in_flight: usize,
    pub call_timeout: Duration,
    /// Fixed delay before the single retry.
    pub retry_backoff: Duration,
    pub max_tokens: u32,
    pub max_query_chars: usize,
    pub shared_max_entries: usize,
    pub shared_entry_chars: usize,
    pub context: ContextLimits,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_units: 3,
            min_confidence: 0.3,
            max_in_flight: 5,
            call_timeout: Duration::from_secs(120),
            retry_backoff: Duration::from_millis(2_000),
            max_tokens: 4_096,
            max_query_chars: 20_000,
            shared_max_entries: 50,
            shared_entry_chars: 4_000,
            context: ContextLimits::default(),
        }
    }
}

pub struct Coordinator {
    router: AgentRouter,
    backends: Backends,
    builder: ContextBuilder,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(registry: Arc<AgentRegistry>, backends: Backends, settings: CoordinatorSettings) -> Self {
        Self {
            router: AgentRouter::new(registry, settings.max_units, settings.min_confidence)
                .with_retrieval(backends.knowledge.is_some()),
            backends,
            builder: ContextBuilder::new(settings.context),
            settings,
        }
    }

    pub fn router(&self) -> &AgentRouter {
        &self.router
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Checks a request and resolves the units it would run with.
    pub fn validate(
        &self,
        request: &CoordinationRequest,
    ) -> Result<Vec<Arc<AgentUnit>>, CoordinationError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(CoordinationError::Validation(
                "query must not be empty".to_string(),
            ));
        }
        if request.query.chars().count() > self.settings.max_query_chars {
            return Err(CoordinationError::Validation(format!(
                "query exceeds {} characters",
                self.settings.max_query_chars
            )));
        }
        self.router
            .resolve(request.agents.as_deref(), query)
            .map_err(|e| CoordinationError::Validation(e.to_string()))
    }

    /// Backend calls the run is expected to make, used for progress.
    pub fn planned_calls(mode: CoordinationMode, units: &[Arc<AgentUnit>]) -> u32 {
        let retrieval = units.iter().filter(|u| u.is_retrieval()).count() as u32;
        let model = units.len() as u32 - retrieval;
        let model_calls = match mode {
            CoordinationMode::Sequential
            | CoordinationMode::Parallel
            | CoordinationMode::Collaborative => model,
            CoordinationMode::Debate if model == 0 => 0,
            CoordinationMode::Debate => 2 * model.min(DEBATE_PARTICIPANTS as u32) + 1,
        };
        retrieval + model_calls
    }

    /// Backend latencies the run is expected to wait through end to end.
    pub fn latency_steps(mode: CoordinationMode, units: &[Arc<AgentUnit>]) -> u32 {
        let retrieval = units.iter().filter(|u| u.is_retrieval()).count() as u32;
        let model = units.len() as u32 - retrieval;
        let model_steps = match mode {
            _ if model == 0 => 0,
            CoordinationMode::Sequential | CoordinationMode::Collaborative => model,
            CoordinationMode::Parallel => 1,
            CoordinationMode::Debate => 3,
        };
        retrieval + model_steps
    }

    /// Executes one request to completion.
    ///
    /// A unit failure after its retry ends the run. In parallel mode, or when
    /// nothing was produced yet, that is a total failure. Otherwise the
    /// outcome keeps what was produced and records the cause in
    /// `partial_failure`. A failed debate synthesis is always total.
    pub async fn run(
        &self,
        request: &CoordinationRequest,
        progress: &dyn ProgressSink,
    ) -> Result<CoordinationOutcome, CoordinationError> {
        let units = self.validate(request)?;
        let roles: Vec<String> = units.iter().map(|u| u.role.clone()).collect();
        info!(mode = %request.mode, agents = ?roles, "coordination started");

        let mut run = Run::new(self, request, progress, Self::planned_calls(request.mode, &units));

        let (retrieval, model): (Vec<_>, Vec<_>) =
            units.iter().cloned().partition(|u| u.is_retrieval());

        let result = match run.retrieval_phase(&retrieval).await {
            Ok(()) if model.is_empty() => Ok(run.last_text()),
            Ok(()) => match request.mode {
                CoordinationMode::Sequential => run.sequential(&model).await,
                CoordinationMode::Parallel => run.parallel(&model).await,
                CoordinationMode::Collaborative => run.collaborative(&model).await,
                CoordinationMode::Debate => run.debate(&model).await,
            },
            Err(err) => Err(ModeFailure::Unit(err)),
        };

        let partial_failure = match result {
            Ok(final_text) => {
                info!(mode = %request.mode, responses = run.responses.len(), "coordination completed");
                return Ok(run.into_outcome(roles, final_text, None));
            }
            Err(ModeFailure::Unit(err))
                if request.mode != CoordinationMode::Parallel && !run.siblings().is_empty() =>
            {
                warn!(mode = %request.mode, error = %err, "coordination stopped early, keeping partial output");
                err.to_string()
            }
            Err(ModeFailure::Unit(err)) => {
                warn!(mode = %request.mode, error = %err, "coordination failed");
                return Err(CoordinationError::TotalFailure {
                    cause: err.to_string(),
                });
            }
            Err(ModeFailure::Total(cause)) => {
                warn!(mode = %request.mode, cause = %cause, "coordination failed");
                return Err(CoordinationError::TotalFailure { cause });
            }
        };

        let final_text = run.last_text();
        Ok(run.into_outcome(roles, final_text, Some(partial_failure)))
    }
}

/// How a mode stopped short.
enum ModeFailure {
    /// A unit failed after its retry.
    Unit(AgentError),
    /// A failure that never yields partial output.
    Total(String),
}

impl From<AgentError> for ModeFailure {
    fn from(err: AgentError) -> Self {
        ModeFailure::Unit(err)
    }
}

/// Mutable state of a single coordination run.
struct Run<'a> {
    coordinator: &'a Coordinator,
    request: &'a CoordinationRequest,
    progress: &'a dyn ProgressSink,
    shared: SharedContext,
    /// Version of `shared` once prior outputs were seeded.
    run_start: u64,
    knowledge: Vec<Snippet>,
    responses: Vec<AgentResponse>,
    interactions: Vec<AgentInteraction>,
    limiter: Semaphore,
    planned_calls: u32,
    finished_calls: u32,
}

impl<'a> Run<'a> {
    fn new(
        coordinator: &'a Coordinator,
        request: &'a CoordinationRequest,
        progress: &'a dyn ProgressSink,
        planned_calls: u32,
    ) -> Self {
        let settings = &coordinator.settings;
        let mut shared = SharedContext::new(settings.shared_max_entries, settings.shared_entry_chars);
        for prior in &request.prior_outputs {
            shared.append(&prior.label, &prior.text);
        }
        let run_start = shared.version();

        Self {
            coordinator,
            request,
            progress,
            shared,
            run_start,
            knowledge: Vec::new(),
            responses: Vec::new(),
            interactions: Vec::new(),
            limiter: Semaphore::new(settings.max_in_flight.max(1)),
            planned_calls: planned_calls.max(1),
            finished_calls: 0,
        }
    }

    /// Outputs produced so far in this run.
    fn siblings(&self) -> Vec<ContextEntry> {
        self.shared.since(self.run_start)
    }

    /// Rendered context for the next invocation.
    fn context(&self, siblings: &[ContextEntry]) -> String {
        self.coordinator
            .builder
            .build(
                &self.request.history,
                &self.shared.before(self.run_start),
                &self.knowledge,
                siblings,
            )
            .render()
    }

    /// Invokes `unit`, retrying a transient failure once after the backoff.
    async fn call(
        &self,
        unit: &AgentUnit,
        request: &str,
        context: String,
    ) -> Result<UnitOutput, AgentError> {
        let settings = &self.coordinator.settings;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let _permit = self.limiter.acquire().await.map_err(|_| AgentError {
                    role: unit.role.clone(),
                    kind: FailureKind::Permanent,
                    message: "concurrency limiter closed".to_string(),
                })?;
                unit.invoke(
                    &self.coordinator.backends,
                    UnitInput {
                        request,
                        context: context.clone(),
                        scope: &self.request.scope,
                        top_k: settings.context.background_items,
                        max_tokens: settings.max_tokens,
                        timeout: settings.call_timeout,
                    },
                )
                .await
            };

            match result {
                Ok(output) => return Ok(output),
                Err(err) if err.is_transient() && attempt <= RETRIES_PER_UNIT => {
                    warn!(
                        role = %unit.role,
                        attempt,
                        error = %err,
                        delay_ms = settings.retry_backoff.as_millis() as u64,
                        "retrying agent unit"
                    );
                    tokio::time::sleep(settings.retry_backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Stores a unit's answer and reports progress.
    async fn record(&mut self, unit: &AgentUnit, phase: &str, text: String, started: Instant) {
        if !unit.is_retrieval() {
            self.shared.append(&unit.role, &text);
        }
        self.responses.push(AgentResponse {
            role: unit.role.clone(),
            phase: phase.to_string(),
            text,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        self.finished_calls += 1;
        let done = self.finished_calls.min(self.planned_calls);
        let percent = 5 + (90 * done / self.planned_calls) as u8;
        self.progress
            .report(percent, &format!("{} finished ({phase})", unit.role))
            .await;
    }

    fn interact(&mut self, source: &str, target: &str, kind: InteractionKind, text: &str) {
        self.interactions.push(AgentInteraction {
            source_role: source.to_string(),
            target_role: target.to_string(),
            kind,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn last_text(&self) -> String {
        self.responses
            .last()
            .map(|r| r.text.clone())
            .unwrap_or_default()
    }

    fn into_outcome(
        self,
        agents: Vec<String>,
        final_text: String,
        partial_failure: Option<String>,
    ) -> CoordinationOutcome {
        CoordinationOutcome {
            mode: self.request.mode,
            agents,
            final_text,
            responses: self.responses,
            interactions: self.interactions,
            partial_failure,
        }
    }
}
