//! Cart service providing the command and query entry points for carts.

use common::AggregateId;
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult, RetryPolicy};
use crate::error::DomainError;

use super::{AddItem, Cart, MarkAbandoned, SubmitCart};

/// Service for managing carts.
///
/// Wraps a command handler so every operation reloads the cart, executes,
/// saves with optimistic locking and retries conflicts.
pub struct CartService<S: EventStore> {
    handler: CommandHandler<S, Cart>,
}

impl<S: EventStore> CartService<S> {
    /// Creates a new cart service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.handler = self.handler.with_retry_policy(retry);
        self
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Cart> {
        &self.handler
    }

    #[tracing::instrument(skip(self), fields(cart_id = %cmd.cart_id))]
    pub async fn add_item(&self, cmd: AddItem) -> Result<CommandResult<Cart>, DomainError> {
        self.handler.execute(cmd).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn submit(&self, cmd: SubmitCart) -> Result<CommandResult<Cart>, DomainError> {
        self.handler.execute(cmd).await
    }

    /// Zero events when the cart moved on since `observed_version`.
    #[tracing::instrument(skip(self))]
    pub async fn mark_abandoned(
        &self,
        cmd: MarkAbandoned,
    ) -> Result<CommandResult<Cart>, DomainError> {
        self.handler.execute(cmd).await
    }

    /// Loads a cart by ID.
    ///
    /// Returns None if the cart doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_cart(&self, cart_id: AggregateId) -> Result<Option<Cart>, DomainError> {
        self.handler.load_existing(cart_id).await
    }
}
