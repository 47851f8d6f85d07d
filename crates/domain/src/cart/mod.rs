//! Cart aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod value_objects;

pub use aggregate::{Cart, CartStatus};
pub use commands::*;
pub use events::{
    CART_ABANDONED, CART_CREATED, CART_SUBMITTED, CartAbandoned, CartCreated, CartEvent,
    CartSubmitted, ITEM_ADDED_TO_CART, ItemAddedToCart,
};
pub use service::CartService;
pub use value_objects::{CartItem, ItemId, Price, UserId};

use common::ErrorKind;
use thiserror::Error;

/// Errors that can occur during cart operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("price must be greater than or equal to 0")]
    NegativePrice,

    #[error("price cannot exceed 1000000")]
    PriceTooLarge,

    #[error("item name is required")]
    NameRequired,

    /// The cart was submitted and is closed to changes.
    #[error("cart is already purchased")]
    AlreadyPurchased,

    #[error("cart is abandoned")]
    Abandoned,

    #[error("cannot purchase empty cart")]
    Empty,
}

impl CartError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CartError::NegativePrice | CartError::PriceTooLarge | CartError::NameRequired => {
                ErrorKind::InvalidParameter
            }
            CartError::AlreadyPurchased | CartError::Abandoned | CartError::Empty => {
                ErrorKind::UnpermittedOp
            }
        }
    }
}
