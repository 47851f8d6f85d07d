//! Cart commands.

use common::AggregateId;
use event_store::Version;

use crate::command::Command;

use super::{ItemId, UserId};

/// Appends an item line, opening the cart on first use.
#[derive(Debug, Clone)]
pub struct AddItem {
    pub cart_id: AggregateId,
    pub user_id: UserId,
    pub tenant_id: AggregateId,
    pub item_id: ItemId,
    pub name: String,
    /// Unvalidated; the aggregate rejects out-of-range values.
    pub price: i64,
}

impl Command for AddItem {
    fn aggregate_id(&self) -> AggregateId {
        self.cart_id
    }
}

/// Command to submit a cart for purchase.
#[derive(Debug, Clone)]
pub struct SubmitCart {
    pub cart_id: AggregateId,
}

impl SubmitCart {
    pub fn new(cart_id: AggregateId) -> Self {
        Self { cart_id }
    }
}

impl Command for SubmitCart {
    fn aggregate_id(&self) -> AggregateId {
        self.cart_id
    }
}

/// Marks a cart abandoned if nothing happened to it since `observed_version`.
#[derive(Debug, Clone)]
pub struct MarkAbandoned {
    pub cart_id: AggregateId,
    pub observed_version: Version,
}

impl MarkAbandoned {
    pub fn new(cart_id: AggregateId, observed_version: Version) -> Self {
        Self {
            cart_id,
            observed_version,
        }
    }
}

impl Command for MarkAbandoned {
    fn aggregate_id(&self) -> AggregateId {
        self.cart_id
    }
}

/// Every command the cart aggregate accepts.
#[derive(Debug, Clone)]
pub enum CartCommand {
    AddItem(AddItem),
    Submit(SubmitCart),
    MarkAbandoned(MarkAbandoned),
}

impl From<AddItem> for CartCommand {
    fn from(cmd: AddItem) -> Self {
        CartCommand::AddItem(cmd)
    }
}

impl From<SubmitCart> for CartCommand {
    fn from(cmd: SubmitCart) -> Self {
        CartCommand::Submit(cmd)
    }
}

impl From<MarkAbandoned> for CartCommand {
    fn from(cmd: MarkAbandoned) -> Self {
        CartCommand::MarkAbandoned(cmd)
    }
}
