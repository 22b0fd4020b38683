//! Priority ordered views of the requests queued on targets.
//!
//! Only renders what brokers report; who gets a target next is decided by
//! the broker.
use std::fmt;

use crate::alloc::AllocationId;
use crate::broker::TargetRef;
use crate::broker::messages::{RawWaiter, TargetListResponse};
use crate::common::config::DEFAULT_MAX_WAITERS;
use crate::dispatcher::Dispatcher;
use crate::{Map, Set};

const WAITER_PROJECTION: &[&str] = &["_alloc*"];

/// One pending request against a target.
///
/// Field order is the ordering key: priority first (lower wins), then the
/// submission timestamp, then the allocation id to break ties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Waiter {
    pub priority: u32,
    pub timestamp: u64,
    pub allocation_id: AllocationId,
    pub preempt: bool,
    pub exclusive: bool,
}

impl Waiter {
    pub fn new(allocation_id: impl Into<AllocationId>, raw: &RawWaiter) -> Self {
        Self {
            priority: raw.priority,
            timestamp: raw.timestamp,
            allocation_id: allocation_id.into(),
            preempt: raw.preempt,
            exclusive: raw.exclusive,
        }
    }
}

impl fmt::Display for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}:{}", self.priority, self.allocation_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaiterQueue {
    pub target: TargetRef,
    pub waiters: Vec<Waiter>,
}

#[derive(Debug, Clone)]
pub struct WaiterQueueModel {
    targets: Vec<TargetRef>,
    max_waiters: usize,
}

impl WaiterQueueModel {
    pub fn new(targets: Vec<TargetRef>) -> Self {
        Self {
            targets,
            max_waiters: DEFAULT_MAX_WAITERS,
        }
    }

    pub fn with_max_waiters(mut self, max_waiters: usize) -> Self {
        self.max_waiters = max_waiters;
        self
    }

    pub fn targets(&self) -> &[TargetRef] {
        &self.targets
    }

    pub fn max_waiters(&self) -> usize {
        self.max_waiters
    }

    /// Orders a raw queue snapshot, keeping at most `max_waiters` entries.
    pub fn build<'a>(
        &self,
        queue: impl IntoIterator<Item = (&'a AllocationId, &'a RawWaiter)>,
    ) -> Vec<Waiter> {
        let mut waiters: Vec<Waiter> = Vec::with_capacity(self.max_waiters);
        for (allocation_id, raw) in queue {
            let waiter = Waiter::new(allocation_id.as_str(), raw);
            let position = waiters.binary_search(&waiter).unwrap_or_else(|pos| pos);
            if position >= self.max_waiters {
                continue;
            }
            waiters.insert(position, waiter);
            waiters.truncate(self.max_waiters);
        }
        waiters
    }

    /// Pulls the current queues of all targets from their brokers.
    ///
    /// A target whose broker did not answer gets an empty queue.
    pub async fn refresh(&self, dispatcher: &Dispatcher) -> Vec<WaiterQueue> {
        let owners: Set<&str> = self.targets.iter().map(|t| t.broker.as_str()).collect();
        let brokers = dispatcher
            .registry()
            .brokers()
            .iter()
            .filter(|broker| owners.contains(broker.aka()))
            .cloned()
            .collect();
        let listings = dispatcher.target_listing(brokers, WAITER_PROJECTION).await;
        let mut queues = self.queues(listings);

        self.targets
            .iter()
            .map(|target| WaiterQueue {
                target: target.clone(),
                waiters: queues.remove(target).unwrap_or_default(),
            })
            .collect()
    }

    fn queues(&self, listings: Map<String, TargetListResponse>) -> Map<TargetRef, Vec<Waiter>> {
        let wanted: Set<&TargetRef> = self.targets.iter().collect();
        let mut queues = Map::new();
        for (broker, listing) in listings {
            for entry in listing.targets {
                let Some(id) = entry.id.as_deref() else {
                    continue;
                };
                let target = TargetRef::new(broker.as_str(), id);
                if !wanted.contains(&target) {
                    continue;
                }
                let waiters = self.build(&entry.alloc.waiters());
                queues.insert(target, waiters);
            }
        }
        queues
    }
}

impl Dispatcher {
    /// Current waiter queues of `targets`, capped at the configured
    /// `max_waiters`. Never changes broker state.
    pub async fn refresh_waiters(&self, targets: Vec<TargetRef>) -> Vec<WaiterQueue> {
        WaiterQueueModel::new(targets)
            .with_max_waiters(self.config().max_waiters)
            .refresh(self)
            .await
    }
}
