//! Client side of the allocation lease protocol spoken by test target brokers.
//!
//! A broker owns a set of targets and hands out time-bounded exclusive leases
//! (allocations) on them. Brokers never coordinate with each other, so every
//! allocation id is only meaningful together with the broker that issued it.

pub mod alloc;
pub mod broker;
pub mod common;
pub mod dispatcher;
pub mod guests;
pub mod registry;
pub mod transport;
pub mod waiters;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::AllocError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = hashbrown::HashMap<K, V>;
pub type Set<T> = hashbrown::HashSet<T>;

pub use alloc::{AllocationId, AllocationState, Groups, TargetId};
pub use broker::{Broker, BrokerRegistry};
pub use common::setup::setup_logging;
pub use dispatcher::Dispatcher;
