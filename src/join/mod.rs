//! The time-windowed left-outer join of interactions and
//! observations.
//!
//! Architecture
//! ------------
//!
//! A [`JoinEngine`] is a single sequential loop. Each
//! [`JoinEngine::step`] handles one interaction batch:
//!
//! 1. Receive a [`MessageBatch`] with the punctuation timeout and
//!    retry policy. If every attempt times out, punctuate the
//!    interaction watermark against the wall clock and evict, so
//!    stale observations still leave when interactions stall.
//!
//! 2. For each joinable sub-event, take its matches out of the
//!    [`DanglingObservations`], then read observations until the
//!    observation watermark passes the sub-event's forward window.
//!    Observations for other ids are held as dangling.
//!
//! 3. Emit one [`JoinedBatch`] for the whole batch and evict
//!    everything older than the backward window.
//!
//! The engine exclusively owns its dangling store and watermarks.
//! The only suspension points are the two receives and the output
//! send, all of which race against the [`Shutdown`] token.
//!
//! All watermarks start at [`DateTime::MIN_UTC`], so the first events
//! of a historical backfill are never counted as out of order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::config::JoinConfig;
use crate::dangling::DanglingObservations;
use crate::errors::JoinError;
use crate::inputs::{receive_with_retries, Received, Source};
use crate::message::{InvalidMessage, JoinedBatch, Message, MessageBatch};
use crate::metrics::{Diagnostics, DiagnosticsSnapshot, JoinMetrics};
use crate::outputs::{InvalidSink, NoopInvalidSink, OutputSink};
use crate::run::Shutdown;
use crate::window::clock::{Clock, SystemClock};
use crate::window::WindowPolicy;
use crate::with_timer;


/// Where the engine is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    AwaitingInteraction,
    MatchingObservations,
    /// Cancelled mid-batch; finishing the batch without waiting.
    Draining,
    Completed,
    Faulted,
}

/// Event-time progress of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    pub last_interaction_processed: DateTime<Utc>,
    /// Current sub-event time plus the forward window.
    pub interaction_ready: DateTime<Utc>,
    pub last_observation: DateTime<Utc>,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            last_interaction_processed: DateTime::<Utc>::MIN_UTC,
            interaction_ready: DateTime::<Utc>::MIN_UTC,
            last_observation: DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// What a single [`JoinEngine::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A joined batch was sent downstream.
    Emitted { sequence_number: i64 },
    /// No interaction arrived; watermarks were punctuated.
    Idle,
    /// The interaction source is closed.
    Closed,
    /// Shutdown was requested.
    Cancelled,
}

pub struct JoinEngine {
    config: JoinConfig,
    policy: WindowPolicy,
    interactions: Box<dyn Source<Item = MessageBatch>>,
    observations: Box<dyn Source<Item = Message>>,
    output: Box<dyn OutputSink>,
    invalid: Box<dyn InvalidSink>,
    clock: Box<dyn Clock>,
    shutdown: Shutdown,
    dangling: DanglingObservations,
    watermarks: Watermarks,
    state: EngineState,
    observations_closed: bool,
    diagnostics: Arc<Diagnostics>,
    metrics: JoinMetrics,
}

impl JoinEngine {
    /// Build an engine with the system clock, no invalid sink and no
    /// shutdown token.
    pub fn new(
        config: JoinConfig,
        interactions: impl Source<Item = MessageBatch> + 'static,
        observations: impl Source<Item = Message> + 'static,
        output: impl OutputSink + 'static,
    ) -> Result<Self, JoinError> {
        config.validate()?;
        let diagnostics = Diagnostics::new();
        let metrics = JoinMetrics::new(&config.engine_id, diagnostics.clone());
        Ok(Self {
            policy: config.window_policy(),
            config,
            interactions: Box::new(interactions),
            observations: Box::new(observations),
            output: Box::new(output),
            invalid: Box::new(NoopInvalidSink),
            clock: Box::new(SystemClock::new()),
            shutdown: Shutdown::never(),
            dangling: DanglingObservations::new(),
            watermarks: Watermarks::default(),
            state: EngineState::Running,
            observations_closed: false,
            diagnostics,
            metrics,
        })
    }

    pub fn with_invalid_sink(mut self, invalid: impl InvalidSink + 'static) -> Self {
        self.invalid = Box::new(invalid);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Report into an existing [`Diagnostics`], e.g. one served by
    /// [`crate::webserver`] across engine restarts.
    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.metrics = JoinMetrics::new(&self.config.engine_id, diagnostics.clone());
        self.diagnostics = diagnostics;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn watermarks(&self) -> Watermarks {
        self.watermarks
    }

    /// Cumulative dangling observation count.
    pub fn dangling_count(&self) -> u64 {
        self.dangling.count()
    }

    /// Observations currently waiting for their interaction.
    pub fn dangling_len(&self) -> usize {
        self.dangling.len()
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diagnostics.clone()
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            tracing::trace!("Join engine {:?} -> {state:?}", self.state);
            self.state = state;
        }
    }

    /// Run until the interaction source closes, shutdown is
    /// requested, or a fault occurs.
    ///
    /// The output sink is completed exactly once on every path.
    /// Cancellation returns `Ok`.
    #[tracing::instrument(name = "join_engine", skip_all, fields(engine_id = %self.config.engine_id))]
    pub async fn run(mut self) -> Result<DiagnosticsSnapshot, JoinError> {
        tracing::info!("Join engine start");
        let res = self.run_loop().await;
        self.output.complete();
        match &res {
            Ok(()) => {
                self.set_state(EngineState::Completed);
                tracing::info!("Join engine stop");
            }
            Err(err) => {
                self.set_state(EngineState::Faulted);
                tracing::error!("Join engine faulted: {err}");
            }
        }
        res.map(|()| self.diagnostics.snapshot())
    }

    async fn run_loop(&mut self) -> Result<(), JoinError> {
        loop {
            match self.step().await? {
                StepOutcome::Emitted { .. } | StepOutcome::Idle => {}
                StepOutcome::Closed => {
                    tracing::info!("Interaction source closed");
                    return Ok(());
                }
                StepOutcome::Cancelled => {
                    tracing::info!("Join engine cancelled");
                    return Ok(());
                }
            }
        }
    }

    /// Perform one iteration of the join loop.
    pub async fn step(&mut self) -> Result<StepOutcome, JoinError> {
        if self.shutdown.is_cancelled() {
            return Ok(StepOutcome::Cancelled);
        }
        self.set_state(EngineState::AwaitingInteraction);

        let timeout = self.config.punctuation_timeout;
        let retries = self.config.max_receive_timeout_retries;
        let mut shutdown = self.shutdown.clone();
        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(StepOutcome::Cancelled),
            res = receive_with_retries(self.interactions.as_mut(), timeout, retries) => {
                res.map_err(|err| JoinError::from_recv("interaction", err))?
            }
        };

        match received {
            Received::Closed => Ok(StepOutcome::Closed),
            Received::Exhausted => {
                self.set_state(EngineState::Running);
                self.punctuate_interactions();
                self.evict_stale();
                Ok(StepOutcome::Idle)
            }
            Received::Item(batch) => {
                let span = tracing::debug_span!(
                    "join_step",
                    partition_id = %batch.partition_id,
                    sequence_number = batch.sequence_number
                );
                self.process_batch(batch).instrument(span).await
            }
        }
    }

    async fn process_batch(&mut self, batch: MessageBatch) -> Result<StepOutcome, JoinError> {
        self.set_state(EngineState::Running);
        if batch.enqueued_time_utc < self.watermarks.last_interaction_processed {
            tracing::debug!(
                "Interaction batch {} at {} is older than last processed {}",
                batch.sequence_number,
                batch.enqueued_time_utc,
                self.watermarks.last_interaction_processed
            );
            self.metrics.interaction_out_of_order();
        }
        self.watermarks.last_interaction_processed = batch.enqueued_time_utc;
        self.metrics.interactions_received(batch.messages.len() as u64);

        let (joined, draining) = with_timer!(
            self.metrics.join_batch_duration,
            self.metrics.labels(),
            self.assemble(batch).await?
        );
        let sequence_number = joined.sequence_number;
        let joined_observations = joined.joined_observations() as u64;

        // A batch is only sent once fully assembled.
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            res = self.output.send(joined) => res?,
            _ = shutdown.cancelled() => {
                tracing::warn!("Shutdown while output was full; dropping batch {sequence_number}");
                return Ok(StepOutcome::Cancelled);
            }
        }
        self.metrics.batch_emitted();
        self.metrics.observations_joined(joined_observations);

        self.evict_stale();

        if draining {
            Ok(StepOutcome::Cancelled)
        } else {
            Ok(StepOutcome::Emitted { sequence_number })
        }
    }

    /// Build the joined batch. Also returns whether shutdown was
    /// requested while waiting for observations.
    async fn assemble(&mut self, batch: MessageBatch) -> Result<(JoinedBatch, bool), JoinError> {
        let mut joined = JoinedBatch::for_batch(&batch);
        let mut draining = false;

        let times: Vec<_> = batch
            .messages
            .iter()
            .map(|message| batch.event_time(message))
            .collect();
        for (message, time) in batch.messages.into_iter().zip(times) {
            if !message.is_joinable_event {
                joined.messages.push(vec![message]);
                continue;
            }
            let mut group = vec![message];
            self.take_dangling(&mut group, time);
            if !draining {
                draining = self.match_observations(&mut group, time).await?;
            }
            joined.messages.push(group);
        }
        Ok((joined, draining))
    }

    fn take_dangling(&mut self, group: &mut Vec<Message>, time: DateTime<Utc>) {
        let (matched, evicted) = self
            .dangling
            .take_matches(&group[0].event_id, Some(time), &self.policy);
        for observation in matched {
            self.record_latency(time, &observation);
            group.push(observation);
        }
        self.report_evicted(evicted);
        self.metrics.dangling_observations(self.dangling.count());
    }

    /// Read observations for the interaction heading `group` until its
    /// forward window is covered by the observation watermark.
    ///
    /// Returns `true` if shutdown was requested while waiting.
    async fn match_observations(
        &mut self,
        group: &mut Vec<Message>,
        time: DateTime<Utc>,
    ) -> Result<bool, JoinError> {
        let ready = self.policy.ready_time(time);
        self.watermarks.interaction_ready = ready;
        if ready <= self.watermarks.last_observation || self.observations_closed {
            return Ok(false);
        }
        self.set_state(EngineState::MatchingObservations);

        let timeout = self.config.punctuation_timeout;
        let retries = self.config.max_receive_timeout_retries;
        while !self.observations_closed && ready > self.watermarks.last_observation {
            let mut shutdown = self.shutdown.clone();
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.set_state(EngineState::Draining);
                    return Ok(true);
                }
                res = receive_with_retries(self.observations.as_mut(), timeout, retries) => {
                    res.map_err(|err| JoinError::from_recv("observation", err))?
                }
            };

            match received {
                Received::Item(observation) => self.accept_observation(observation, group, time),
                Received::Exhausted => {
                    let candidate = self.watermarks.last_observation.max(time);
                    let now = self.clock.now();
                    let punctuated = self.policy.punctuate(candidate, now);
                    if punctuated > self.watermarks.last_observation {
                        self.watermarks.last_observation = punctuated;
                    }
                    tracing::trace!(
                        "Observation watermark punctuated to {punctuated}, waiting until {ready}"
                    );
                }
                Received::Closed => {
                    tracing::info!("Observation source closed");
                    self.observations_closed = true;
                }
            }
        }

        self.set_state(EngineState::Running);
        Ok(false)
    }

    fn accept_observation(
        &mut self,
        observation: Message,
        group: &mut Vec<Message>,
        time: DateTime<Utc>,
    ) {
        self.metrics.observation_received();

        let Some(observed_at) = observation
            .enqueued_time_utc
            .filter(|_| observation.is_joinable_event)
        else {
            tracing::debug!("Observation {} is not joinable", observation.event_id);
            self.metrics.observation_not_joinable();
            self.report_invalid(InvalidMessage::not_joinable(observation));
            return;
        };

        if observed_at < self.watermarks.last_observation {
            tracing::debug!(
                "Observation {} at {observed_at} is older than last observation {}",
                observation.event_id,
                self.watermarks.last_observation
            );
            self.metrics.observation_out_of_order();
        }
        self.watermarks.last_observation = observed_at;

        if observation.event_id != group[0].event_id {
            self.dangling.add(observation.event_id.clone(), observation);
        } else if self.policy.is_match(Some(time), Some(observed_at)) {
            self.record_latency(time, &observation);
            group.push(observation);
        } else {
            // Event ids are unique per interaction, so this one can
            // never be joined.
            let event_id = observation.event_id.clone();
            self.dangling.add(event_id.clone(), observation);
            let (_, evicted) = self
                .dangling
                .take_matches(&event_id, Some(time), &self.policy);
            self.report_evicted(evicted);
        }
        self.metrics.dangling_observations(self.dangling.count());
    }

    fn punctuate_interactions(&mut self) {
        let now = self.clock.now();
        let punctuated = self
            .policy
            .punctuate(self.watermarks.last_interaction_processed, now);
        if punctuated > self.watermarks.last_interaction_processed {
            tracing::trace!("Interaction watermark punctuated to {punctuated}");
            self.watermarks.last_interaction_processed = punctuated;
        }
    }

    fn evict_stale(&mut self) {
        let cutoff = self
            .policy
            .eviction_cutoff(self.watermarks.last_interaction_processed);
        let evicted = self.dangling.evict_older_than(cutoff);
        if !evicted.is_empty() {
            tracing::debug!(
                "Evicted {} dangling observations older than {cutoff}",
                evicted.len()
            );
        }
        self.report_evicted(evicted);
        self.metrics.dangling_observations(self.dangling.count());
    }

    fn record_latency(&self, time: DateTime<Utc>, observation: &Message) {
        if let Some(observed_at) = observation.enqueued_time_utc {
            let latency = observed_at.signed_duration_since(time);
            self.metrics
                .observation_latency(latency.num_milliseconds() as f64 / 1000.0);
        }
    }

    fn report_evicted(&mut self, evicted: Vec<Message>) {
        self.metrics.observations_evicted(evicted.len() as u64);
        for observation in evicted {
            self.report_invalid(InvalidMessage::evicted(observation));
        }
    }

    fn report_invalid(&mut self, message: InvalidMessage) {
        if let Err(err) = self.invalid.send(message) {
            tracing::warn!("Unable to report invalid observation: {err}");
        }
    }
}

impl Drop for JoinEngine {
    fn drop(&mut self) {
        // Covers an engine dropped mid-step, e.g. by an aborted task.
        self.output.complete();
    }
}
