//! Value objects for the cart domain.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CartError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// The shopper who owns a cart.
    UserId
);

uuid_id!(
    /// Catalogue item identifier.
    ItemId
);

/// Non-negative integer price, at most [`Price::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(i64);

impl Price {
    pub const MAX: i64 = 1_000_000;

    pub fn new(amount: i64) -> Result<Self, CartError> {
        if amount < 0 {
            return Err(CartError::NegativePrice);
        }
        if amount > Self::MAX {
            return Err(CartError::PriceTooLarge);
        }
        Ok(Self(amount))
    }

    pub fn amount(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A line in a cart. Adding the same item twice yields two lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub item_id: ItemId,
    pub name: String,
    pub price: Price,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(UserId::new(), UserId::new());
        let uuid = Uuid::new_v4();
        assert_eq!(ItemId::from_uuid(uuid).as_uuid(), uuid);
    }

    #[test]
    fn test_price_bounds() {
        assert_eq!(Price::new(0).unwrap().amount(), 0);
        assert_eq!(Price::new(Price::MAX).unwrap().amount(), 1_000_000);
        assert!(matches!(Price::new(-1), Err(CartError::NegativePrice)));
        assert!(matches!(
            Price::new(Price::MAX + 1),
            Err(CartError::PriceTooLarge)
        ));
    }

    #[test]
    fn test_price_error_messages() {
        assert_eq!(
            Price::new(-5).unwrap_err().to_string(),
            "price must be greater than or equal to 0"
        );
        assert_eq!(
            Price::new(2_000_000).unwrap_err().to_string(),
            "price cannot exceed 1000000"
        );
    }
}
