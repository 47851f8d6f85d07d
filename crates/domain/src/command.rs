//! Command handling infrastructure.

use std::marker::PhantomData;
use std::time::Duration;

use common::{AggregateId, ErrorKind};
use event_store::{AppendOptions, EventStore, Version};

use crate::aggregate::{Aggregate, RecordedEvent};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<RecordedEvent<A::Event>>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Trait for commands that can be executed against an aggregate.
///
/// Commands represent an intention to perform an action. They may be rejected
/// if the aggregate's current state doesn't allow the action.
pub trait Command: Send + Sync {
    /// Returns the ID of the aggregate this command targets.
    fn aggregate_id(&self) -> AggregateId;
}

/// Bounded retry for optimistic-lock conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay after attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Linear backoff after the given (1-based) attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// Handler for executing commands against aggregates.
///
/// The handler is responsible for:
/// 1. Loading the aggregate's history (no history means a fresh aggregate)
/// 2. Executing the command to raise events
/// 3. Persisting the events with the loaded version as the expected version
/// 4. Reloading and retrying when a concurrent writer got there first
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    retry: RetryPolicy,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            _phantom: PhantomData,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the aggregate doesn't exist, returns a fresh instance.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let mut aggregate = A::new(aggregate_id);

        match self
            .store
            .load_events(aggregate_id, A::aggregate_type())
            .await
        {
            Ok(envelopes) => {
                let history = envelopes
                    .iter()
                    .map(RecordedEvent::from_envelope)
                    .collect::<Result<Vec<_>, _>>()?;
                aggregate.hydrate(history);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.is_new() {
            Ok(None)
        } else {
            Ok(Some(aggregate))
        }
    }

    /// Executes a command and persists the resulting events.
    ///
    /// `OptimisticLock` failures reload and re-run the command up to the
    /// retry policy's attempt limit. Every other error is returned at once.
    pub async fn execute<C>(&self, command: C) -> Result<CommandResult<A>, DomainError>
    where
        C: Command + Into<A::Command> + Clone,
        DomainError: From<A::Error>,
    {
        let aggregate_id = command.aggregate_id();
        let mut attempt = 1;

        loop {
            match self.try_execute(aggregate_id, command.clone().into()).await {
                Err(e) if e.kind() == ErrorKind::OptimisticLock && attempt < self.retry.max_attempts => {
                    metrics::counter!("command_retries_total", "aggregate" => A::aggregate_type())
                        .increment(1);
                    tracing::warn!(
                        aggregate_type = A::aggregate_type(),
                        %aggregate_id,
                        attempt,
                        "optimistic lock conflict, retrying"
                    );
                    tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_execute(
        &self,
        aggregate_id: AggregateId,
        command: A::Command,
    ) -> Result<CommandResult<A>, DomainError>
    where
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let loaded_version = aggregate.version();

        aggregate.execute(command)?;

        if aggregate.uncommitted_events().is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: loaded_version,
            });
        }

        let envelopes = aggregate
            .uncommitted_events()
            .iter()
            .map(|event| event.to_envelope(aggregate_id, A::aggregate_type()))
            .collect::<Result<Vec<_>, _>>()?;

        let new_version = self
            .store
            .save_events(envelopes, AppendOptions::expect_version(loaded_version))
            .await?;

        let events = aggregate.uncommitted_events().to_vec();
        aggregate.mark_committed();

        tracing::debug!(
            aggregate_type = A::aggregate_type(),
            %aggregate_id,
            %new_version,
            event_count = events.len(),
            "command persisted"
        );

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }
}
