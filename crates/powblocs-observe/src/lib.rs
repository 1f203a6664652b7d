//! PowBlocs Observe
//!
//! A small publish/subscribe layer. A [`Topic`] fans a borrowed value out to
//! every registered observer; a [`KeyedTopic`] keeps one topic per key (per
//! task id, in practice). Subscribing returns a [`Subscription`] guard that
//! deregisters the observer when dropped or explicitly unsubscribed.
//!
//! Observers are called synchronously by the publisher, in subscription
//! order, and never while an internal lock is held: an observer may read from
//! or subscribe to the structure that notified it.

mod keyed;
mod subscription;
mod topic;

pub use keyed::KeyedTopic;
pub use subscription::Subscription;
pub use topic::{Observer, Topic};
