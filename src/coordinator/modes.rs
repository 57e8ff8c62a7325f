use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::debug;

use super::types::InteractionKind;
use super::{DEBATE_PARTICIPANTS, ModeFailure, Run};
use crate::agents::{AgentError, AgentUnit, UnitOutput};

type Finished = (Arc<AgentUnit>, Result<UnitOutput, AgentError>, Instant);

impl Run<'_> {
    /// Runs every retrieval unit before anything else and folds the snippets
    /// into the background of all later invocations.
    pub(super) async fn retrieval_phase(
        &mut self,
        units: &[Arc<AgentUnit>],
    ) -> Result<(), AgentError> {
        for unit in units {
            let started = Instant::now();
            let context = self.context(&self.siblings());
            let output = self.call(unit, &self.request.query, context).await?;
            debug!(role = %unit.role, snippets = output.snippets.len(), "background retrieved");
            self.knowledge.extend(output.snippets);
            self.record(unit, "retrieval", output.text, started).await;
        }
        Ok(())
    }

    /// Each unit sees every output produced before it. The last answer wins.
    pub(super) async fn sequential(
        &mut self,
        units: &[Arc<AgentUnit>],
    ) -> Result<String, ModeFailure> {
        let mut final_text = String::new();
        for unit in units {
            let started = Instant::now();
            let context = self.context(&self.siblings());
            let output = self.call(unit, &self.request.query, context).await?;
            final_text = output.text.clone();
            self.record(unit, "sequential", output.text, started).await;
        }
        Ok(final_text)
    }

    /// All units answer against the same snapshot. Any failure discards the batch.
    pub(super) async fn parallel(
        &mut self,
        units: &[Arc<AgentUnit>],
    ) -> Result<String, ModeFailure> {
        let snapshot = self.context(&self.siblings());
        let query = self.request.query.clone();
        let finished = self.fan_out(units, &query, &snapshot).await;

        if let Some(err) = finished.iter().find_map(|(_, r, _)| r.as_ref().err()) {
            return Err(ModeFailure::Unit(err.clone()));
        }
        for (unit, result, started) in finished {
            if let Ok(output) = result {
                self.record(&unit, "parallel", output.text, started).await;
            }
        }

        Ok(self
            .responses
            .iter()
            .filter(|r| r.phase == "parallel")
            .map(|r| format!("### {}\n{}", r.role, r.text))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// The first unit consults each of the others, then answers once with
    /// the consultations in context.
    pub(super) async fn collaborative(
        &mut self,
        units: &[Arc<AgentUnit>],
    ) -> Result<String, ModeFailure> {
        let Some((primary, supporting)) = units.split_first() else {
            return Ok(self.last_text());
        };

        for unit in supporting {
            let consultation = format!(
                "The {primary} agent is preparing an answer to the request below and asks for \
                 your input as the {role} agent. Point out what it should take into account.\n\n\
                 Request: {query}",
                primary = primary.role,
                role = unit.role,
                query = self.request.query,
            );
            self.interact(
                &primary.role,
                &unit.role,
                InteractionKind::Consultation,
                &consultation,
            );

            let started = Instant::now();
            let context = self.context(&self.siblings());
            let output = self.call(unit, &consultation, context).await?;
            self.interact(&unit.role, &primary.role, InteractionKind::Response, &output.text);
            self.record(unit, "consultation", output.text, started).await;
        }

        let started = Instant::now();
        let context = self.context(&self.siblings());
        let output = self.call(primary, &self.request.query, context).await?;
        let final_text = output.text.clone();
        self.record(primary, "final", output.text, started).await;
        Ok(final_text)
    }

    /// Two fixed rounds among up to three participants, then synthesis.
    pub(super) async fn debate(&mut self, units: &[Arc<AgentUnit>]) -> Result<String, ModeFailure> {
        let participants = &units[..units.len().min(DEBATE_PARTICIPANTS)];
        let query = self.request.query.clone();

        let opening = self.context(&self.siblings());
        self.debate_round(participants, &query, &opening, "round 1").await?;

        let rebuttal = format!(
            "{query}\n\nThis is round 2 of a debate. The other participants' round 1 positions \
             are in the context. Acknowledge strong points, challenge weak ones and give your \
             revised position."
        );
        let context = self.context(&self.siblings());
        let round_two_start = self.responses.len();
        self.debate_round(participants, &rebuttal, &context, "round 2").await?;

        let round_two: Vec<(String, String)> = self.responses[round_two_start..]
            .iter()
            .map(|r| (r.role.clone(), r.text.clone()))
            .collect();
        for (role, text) in &round_two {
            for peer in participants.iter().filter(|p| &p.role != role) {
                self.interact(role, &peer.role, InteractionKind::Response, text);
            }
        }

        let synthesizer = self.coordinator.router.registry().synthesizer().clone();
        let instruction = format!(
            "Reconcile the debate in the context into one final answer. Keep the points the \
             participants agree on, resolve disagreements explicitly and say which position \
             prevailed and why.\n\nRequest: {query}"
        );
        let started = Instant::now();
        let context = self.context(&self.siblings());
        let output = self
            .call(&synthesizer, &instruction, context)
            .await
            .map_err(|err| ModeFailure::Total(format!("debate synthesis failed: {err}")))?;
        let final_text = output.text.clone();
        self.record(&synthesizer, "synthesis", output.text, started).await;
        Ok(final_text)
    }

    /// Runs one debate round concurrently. Successful turns are kept even
    /// when another participant fails.
    async fn debate_round(
        &mut self,
        participants: &[Arc<AgentUnit>],
        request: &str,
        context: &str,
        phase: &str,
    ) -> Result<(), ModeFailure> {
        let finished = self.fan_out(participants, request, context).await;
        let mut failure = None;
        for (unit, result, started) in finished {
            match result {
                Ok(output) => self.record(&unit, phase, output.text, started).await,
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(ModeFailure::Unit(err)),
            None => Ok(()),
        }
    }

    /// Invokes `units` concurrently, bounded by the run's limiter. Results
    /// come back in unit order.
    async fn fan_out(
        &self,
        units: &[Arc<AgentUnit>],
        request: &str,
        context: &str,
    ) -> Vec<Finished> {
        let calls = units.iter().map(|unit| async move {
            let started = Instant::now();
            let result = self.call(unit, request, context.to_string()).await;
            (unit.clone(), result, started)
        });
        join_all(calls).await
    }
}
