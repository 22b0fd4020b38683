//! Multi-broker operations.
//!
//! Every fan-out runs one task per unit on the shared [`WorkerPool`] and
//! waits for all of them before results are merged. A failing broker only
//! loses its own contribution.
mod pool;
mod report;
mod targets;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::Map;
use crate::alloc::{
    ALLOCATION_GROUP, AllocationClient, AllocationRequestBuilder, AllocationState, Groups,
    HoldOutcome, SubmitOutcome,
};
use crate::broker::messages::TargetListResponse;
use crate::broker::{AllocationRef, Broker, BrokerRegistry, BrokerScope, TargetRef};
use crate::common::config::ClientConfig;
use crate::common::error::AllocError;
use crate::transport::Method;

pub use pool::WorkerPool;
pub use report::{BatchReport, UnitOutcome};
pub use targets::TargetInventory;


/// Projection used to discover targets without their full inventory.
const DISCOVERY_PROJECTION: &[&str] = &["id", "disabled"];

#[derive(Debug)]
pub struct AllocateOutcome {
    pub broker: String,
    pub submit: SubmitOutcome,
    /// Set when a hold was requested and the allocation could be held.
    pub hold: Option<HoldOutcome>,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<BrokerRegistry>,
    pool: WorkerPool,
    config: Arc<ClientConfig>,
}

impl Dispatcher {
    pub fn new(registry: BrokerRegistry, config: ClientConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            pool: WorkerPool::new(config.max_workers),
            config: Arc::new(config),
        }
    }

    pub fn from_config(config: ClientConfig) -> crate::Result<Self> {
        let registry = BrokerRegistry::from_config(&config)?;
        Ok(Self::new(registry, config))
    }

    pub fn registry(&self) -> &Arc<BrokerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn client(&self, broker: &Broker) -> AllocationClient {
        AllocationClient::with_config(broker.clone(), &self.config)
    }

    /// Runs `f` against every configured broker.
    pub async fn fan_out<T, F, Fut>(&self, f: F) -> Map<String, T>
    where
        F: FnMut(Broker) -> Fut,
        Fut: Future<Output = crate::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.fan_out_to(self.registry.brokers().to_vec(), f).await
    }

    /// Runs `f` against each of `brokers`, keyed by broker alias.
    ///
    /// Brokers that fail are logged and left out of the result.
    pub async fn fan_out_to<T, F, Fut>(&self, brokers: Vec<Broker>, f: F) -> Map<String, T>
    where
        F: FnMut(Broker) -> Fut,
        Fut: Future<Output = crate::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let aliases: Vec<String> = brokers.iter().map(|b| b.aka().to_string()).collect();
        let results = self.pool.run_all(brokers.into_iter().map(f)).await;

        let mut merged = Map::with_capacity(aliases.len());
        for (aka, result) in aliases.into_iter().zip(results) {
            match result {
                Some(Ok(value)) => {
                    merged.insert(aka, value);
                }
                Some(Err(error)) => log::warn!("{aka}: {error}"),
                None => {}
            }
        }
        merged
    }

    /// `GET targets/` on each broker, limited to the given fields.
    pub async fn target_listing(
        &self,
        brokers: Vec<Broker>,
        projection: &[&str],
    ) -> Map<String, TargetListResponse> {
        let body = json!({ "projection": projection });
        self.fan_out_to(brokers, |broker| {
            let body = body.clone();
            async move {
                broker
                    .request_as::<TargetListResponse>(Method::Get, "targets/", Some(body))
                    .await
            }
        })
        .await
    }

    pub async fn discover_targets(&self, include_disabled: bool) -> TargetInventory {
        let listings = self
            .target_listing(self.registry.brokers().to_vec(), DISCOVERY_PROJECTION)
            .await;
        TargetInventory::from_listings(listings, include_disabled)
    }

    /// Allocates `targets` as one group and optionally holds the lease.
    ///
    /// All targets must belong to the same broker. When `hold` is given the
    /// allocation is released once holding ends, for whatever reason.
    pub async fn allocate(
        &self,
        targets: &[TargetRef],
        request: AllocationRequestBuilder,
        hold: Option<Duration>,
        cancel: &CancellationToken,
    ) -> crate::Result<AllocateOutcome> {
        let (broker, ids) = self.registry.single_owner(targets)?;
        let mut groups = Groups::new();
        groups.insert(ALLOCATION_GROUP.to_string(), ids.into_iter().collect());
        let request = request
            .groups(groups)
            .build()
            .map_err(|error| AllocError::Config(error.to_string()))?;

        let client = self.client(&broker);
        let submit = client.submit(&request, cancel).await?;
        let mut outcome = AllocateOutcome {
            broker: broker.aka().to_string(),
            submit,
            hold: None,
        };

        let Some(max_hold) = hold else {
            return Ok(outcome);
        };
        let allocation_id = &outcome.submit.allocation_id;
        if outcome.submit.state.is_holdable() {
            outcome.hold = Some(
                client
                    .hold(allocation_id, outcome.submit.state, max_hold, cancel)
                    .await,
            );
        }
        log::info!("allocation ID {allocation_id}: releasing");
        client.release(allocation_id).await?;
        Ok(outcome)
    }

    /// Holds an allocation granted earlier, then releases it.
    ///
    /// `allocation` needs its broker alias unless only one broker is
    /// configured. The first heartbeat is sent as `unknown` so the broker
    /// reports the current state.
    pub async fn hold_existing(
        &self,
        allocation: &str,
        max_hold: Duration,
        cancel: &CancellationToken,
    ) -> crate::Result<HoldOutcome> {
        let allocation = AllocationRef::parse(allocation);
        let broker = match self.registry.resolve_strict(&allocation)? {
            BrokerScope::Owner(broker) => broker,
            BrokerScope::Scatter(_) => {
                return Err(AllocError::Config(format!(
                    "{}: cannot tell which server owns the allocation, use ALIAS/ID",
                    allocation.id
                )));
            }
        };

        let client = self.client(&broker);
        let outcome = client
            .hold(&allocation.id, AllocationState::Unknown, max_hold, cancel)
            .await;
        log::info!("allocation ID {}: releasing", allocation.id);
        client.release(&allocation.id).await?;
        Ok(outcome)
    }

    /// Releases one allocation, given as `alias/id` or a bare id.
    pub async fn release(&self, allocation: &str) -> BatchReport {
        self.release_all(&[allocation]).await
    }

    /// Releases a batch of allocations, one pool task per id.
    ///
    /// An id whose owner is not known is released on every broker; the
    /// brokers that don't own it report benign failures in the report.
    pub async fn release_all<S: AsRef<str>>(&self, allocations: &[S]) -> BatchReport {
        let ids: Vec<String> = allocations.iter().map(|id| id.as_ref().to_string()).collect();
        let units = ids.iter().map(|id| {
            let dispatcher = self.clone();
            let id = id.clone();
            async move { dispatcher.release_one(&id).await }
        });
        let results = self.pool.run_all(units).await;

        let mut report = BatchReport::default();
        for (id, outcomes) in ids.into_iter().zip(results) {
            match outcomes {
                Some(outcomes) => report.extend(outcomes),
                None => report.push(UnitOutcome::new(
                    id,
                    None,
                    Err(AllocError::GenericError("release task failed".to_string())),
                )),
            }
        }
        report
    }

    async fn release_one(&self, id: &str) -> Vec<UnitOutcome> {
        let allocation = AllocationRef::parse(id);
        let scope = match self.registry.resolve_lenient(&allocation) {
            Ok(scope) => scope,
            Err(error) => {
                log::error!("{id}: {error}");
                return vec![UnitOutcome::new(id, None, Err(error))];
            }
        };

        // Runs inside a pool task already, so the brokers of one id are
        // tried one after another.
        let mut outcomes = Vec::with_capacity(scope.brokers().len());
        for broker in scope.brokers() {
            let result = self.client(broker).release(&allocation.id).await;
            if let Err(error) = &result {
                if scope.is_scatter() {
                    log::warn!("{id}: {}: {error}", broker.aka());
                } else {
                    log::error!("{id}: {error}");
                }
            }
            outcomes.push(UnitOutcome::new(id, Some(broker.aka()), result));
        }
        outcomes
    }
}
