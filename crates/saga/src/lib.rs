//! Delayed scheduling and the cart abandonment saga.
//!
//! When an item lands in a cart, the [`CartAbandonmentSubscriber`] schedules
//! a check message to fire after the tenant's abandonment delay. The
//! [`DelaySweeper`] publishes due messages, and the
//! [`CartAbandonmentChecker`] marks the cart abandoned if nothing happened
//! to it in the meantime.

pub mod abandonment;
pub mod delay;
pub mod error;
pub mod postgres;
pub mod sweeper;

pub use abandonment::{
    CHECK_MESSAGE_TYPE, CHECK_TOPIC, CHECKER_GROUP, CartAbandonmentChecker,
    CartAbandonmentSubscriber, CheckCartAbandonment, SUBSCRIBER_GROUP,
};
pub use delay::{DEFAULT_LEASE, DelayScheduler, DelayedEntry, InMemoryDelayQueue};
pub use error::{Result, SagaError};
pub use postgres::PostgresDelayQueue;
pub use sweeper::{DelaySweeper, SweepReport, SweeperConfig};
