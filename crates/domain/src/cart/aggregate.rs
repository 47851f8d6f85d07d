//! Cart aggregate implementation.

use chrono::Utc;
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, RecordedEvent};

use super::{
    AddItem, CartAbandoned, CartCommand, CartCreated, CartError, CartEvent, CartItem,
    CartSubmitted, ItemAddedToCart, MarkAbandoned, Price, UserId,
};

/// Lifecycle of a cart. Transitions only leave `Open`.
///
/// ```text
/// Open ──┬──► Submitted
///        └──► Abandoned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartStatus {
    #[default]
    Open,
    Submitted,
    Abandoned,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CartStatus::Open => "OPEN",
            CartStatus::Submitted => "SUBMITTED",
            CartStatus::Abandoned => "ABANDONED",
        }
    }
}

impl std::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cart aggregate root.
#[derive(Debug, Clone)]
pub struct Cart {
    id: AggregateId,
    version: Version,
    user_id: Option<UserId>,
    tenant_id: Option<AggregateId>,
    items: Vec<CartItem>,
    status: CartStatus,
    changes: Vec<RecordedEvent<CartEvent>>,
}

impl Aggregate for Cart {
    type Event = CartEvent;
    type Command = CartCommand;
    type Error = CartError;

    fn aggregate_type() -> &'static str {
        "Cart"
    }

    fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: Version::NEW,
            user_id: None,
            tenant_id: None,
            items: Vec::new(),
            status: CartStatus::Open,
            changes: Vec::new(),
        }
    }

    fn id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn execute(&mut self, command: CartCommand) -> Result<(), CartError> {
        match command {
            CartCommand::AddItem(cmd) => self.add_item(cmd),
            CartCommand::Submit(_) => self.submit(),
            CartCommand::MarkAbandoned(cmd) => self.mark_abandoned(cmd),
        }
    }

    fn apply(&mut self, event: &CartEvent, version: Version) {
        match event {
            CartEvent::CartCreated(data) => {
                self.id = data.cart_id;
                self.user_id = Some(data.user_id);
                self.tenant_id = Some(data.tenant_id);
                self.status = CartStatus::Open;
            }
            CartEvent::ItemAddedToCart(data) => {
                self.items.push(CartItem {
                    item_id: data.item_id,
                    name: data.name.clone(),
                    price: data.price,
                });
            }
            CartEvent::CartSubmitted(_) => self.status = CartStatus::Submitted,
            CartEvent::CartAbandoned(_) => self.status = CartStatus::Abandoned,
        }
        self.version = version;
    }

    fn uncommitted_events(&self) -> &[RecordedEvent<CartEvent>] {
        &self.changes
    }

    fn uncommitted_events_mut(&mut self) -> &mut Vec<RecordedEvent<CartEvent>> {
        &mut self.changes
    }
}

// Query methods
impl Cart {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn tenant_id(&self) -> Option<AggregateId> {
        self.tenant_id
    }

    pub fn status(&self) -> CartStatus {
        self.status
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Sum of all line prices.
    pub fn total_amount(&self) -> i64 {
        self.items.iter().map(|item| item.price.amount()).sum()
    }

    pub fn is_open(&self) -> bool {
        self.status == CartStatus::Open
    }
}

// Command methods
impl Cart {
    fn ensure_open(&self) -> Result<(), CartError> {
        match self.status {
            CartStatus::Open => Ok(()),
            CartStatus::Submitted => Err(CartError::AlreadyPurchased),
            CartStatus::Abandoned => Err(CartError::Abandoned),
        }
    }

    /// On a new cart this raises the creation event before the item event.
    fn add_item(&mut self, cmd: AddItem) -> Result<(), CartError> {
        self.ensure_open()?;
        let price = Price::new(cmd.price)?;
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(CartError::NameRequired);
        }

        let now = Utc::now();
        if self.is_new() {
            self.raise(CartEvent::CartCreated(CartCreated {
                cart_id: cmd.cart_id,
                user_id: cmd.user_id,
                tenant_id: cmd.tenant_id,
                created_at: now,
            }));
        }

        let tenant_id = self.tenant_id.unwrap_or(cmd.tenant_id);
        self.raise(CartEvent::ItemAddedToCart(ItemAddedToCart {
            item_id: cmd.item_id,
            name: name.to_string(),
            price,
            tenant_id,
            added_at: now,
        }));
        Ok(())
    }

    fn submit(&mut self) -> Result<(), CartError> {
        if self.is_new() {
            return Err(CartError::Empty);
        }
        self.ensure_open()?;
        if self.items.is_empty() {
            return Err(CartError::Empty);
        }

        self.raise(CartEvent::CartSubmitted(CartSubmitted {
            total_amount: self.total_amount(),
            item_count: self.items.len(),
            submitted_at: Utc::now(),
        }));
        Ok(())
    }

    /// A no-op unless the cart is still open at the observed version.
    fn mark_abandoned(&mut self, cmd: MarkAbandoned) -> Result<(), CartError> {
        if !self.is_open() || self.is_new() || self.version != cmd.observed_version {
            return Ok(());
        }

        self.raise(CartEvent::CartAbandoned(CartAbandoned {
            abandoned_at: Utc::now(),
        }));
        Ok(())
    }
}
