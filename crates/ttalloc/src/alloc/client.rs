use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::Map;
use crate::alloc::{AllocationId, AllocationRequest, AllocationState, TargetId, allocated_groups};
use crate::broker::Broker;
use crate::broker::messages::{
    AllocationRecord, CreateAllocationRequest, CreateAllocationResponse, keepalive_request,
    keepalive_state,
};
use crate::common::config::{ClientConfig, DEFAULT_HOLD_PERIOD, DEFAULT_KEEPALIVE_PERIOD};
use crate::common::error::AllocError;
use crate::transport::Method;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub allocation_id: AllocationId,
    pub state: AllocationState,
    /// Granted targets keyed by group name; empty unless it became active.
    pub allocated: Map<String, Vec<TargetId>>,
}

/// Drives the lifecycle of allocations on a single broker.
///
/// Everything here is one sequential flow per caller: the protocol only
/// observes broker state over time.
#[derive(Debug, Clone)]
pub struct AllocationClient {
    broker: Broker,
    pub(super) keepalive_period: Duration,
    pub(super) hold_period: Duration,
}

impl AllocationClient {
    pub fn new(broker: Broker) -> Self {
        Self {
            broker,
            keepalive_period: DEFAULT_KEEPALIVE_PERIOD,
            hold_period: DEFAULT_HOLD_PERIOD,
        }
    }

    pub fn with_config(broker: Broker, config: &ClientConfig) -> Self {
        Self {
            broker,
            keepalive_period: config.keepalive_period,
            hold_period: config.hold_period,
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Submits an allocation and, unless the request opts out, waits in the
    /// broker queue until the targets are granted.
    ///
    /// When `cancel` fires during the queue wait, the allocation is released
    /// before [`AllocError::Interrupted`] is returned.
    pub async fn submit(
        &self,
        request: &AllocationRequest,
        cancel: &CancellationToken,
    ) -> crate::Result<SubmitOutcome> {
        let started = Instant::now();
        let response = self.create(request).await?;
        let state = AllocationState::from_wire(&response.state);
        if !matches!(state, AllocationState::Queued | AllocationState::Active) {
            return Err(AllocError::Rejected {
                state: response.state,
                message: response
                    .message
                    .unwrap_or_else(|| "message n/a".to_string()),
            });
        }
        let allocation_id = response.allocid.ok_or_else(|| {
            AllocError::Protocol(format!(
                "{}: allocation response without allocid",
                self.broker.aka()
            ))
        })?;

        if state == AllocationState::Active {
            return Ok(SubmitOutcome {
                allocation_id,
                state,
                allocated: allocated_groups(
                    &request.groups,
                    response.group_allocated.as_deref().unwrap_or_default(),
                ),
            });
        }
        if request.skips_queue_wait() {
            return Ok(SubmitOutcome {
                allocation_id,
                state,
                allocated: Map::new(),
            });
        }

        log::info!(
            "allocation ID {allocation_id}: [+{:.1}s] keeping alive during state '{state}'",
            started.elapsed().as_secs_f64()
        );
        tokio::select! {
            result = self.wait_in_queue(&allocation_id, state, request, started) => result,
            _ = cancel.cancelled() => {
                log::info!(
                    "allocation ID {allocation_id}: [+{:.1}s] releasing due to user interruption",
                    started.elapsed().as_secs_f64()
                );
                if let Err(error) = self.release(&allocation_id).await {
                    log::error!("allocation ID {allocation_id}: release failed: {error}");
                }
                Err(AllocError::Interrupted { allocation_id: allocation_id.clone() })
            }
        }
    }

    async fn create(&self, request: &AllocationRequest) -> crate::Result<CreateAllocationResponse> {
        let body = serde_json::to_value(CreateAllocationRequest::from(request))?;
        self.broker
            .request_as(Method::Put, "allocation", Some(body))
            .await
    }

    async fn wait_in_queue(
        &self,
        allocation_id: &str,
        mut state: AllocationState,
        request: &AllocationRequest,
        started: Instant,
    ) -> crate::Result<SubmitOutcome> {
        loop {
            if let Some(timeout) = request.queue_timeout {
                if started.elapsed() > timeout {
                    return Err(AllocError::Blocked {
                        timeout,
                        groups: request.groups.clone(),
                    });
                }
            }
            sleep(self.keepalive_period).await;

            let new_state = match self.keepalive(allocation_id, state).await {
                Ok(Some(new_state)) => new_state,
                Ok(None) => continue,
                Err(error) => {
                    log::warn!("allocation ID {allocation_id}: keepalive failed: {error}");
                    continue;
                }
            };
            let elapsed = started.elapsed().as_secs_f64();

            match new_state {
                AllocationState::Active => match self.fetch(allocation_id).await {
                    Ok(record) => {
                        return Ok(SubmitOutcome {
                            allocation_id: allocation_id.to_string(),
                            state: new_state,
                            allocated: allocated_groups(
                                &request.groups,
                                record.group_allocated.as_deref().unwrap_or_default(),
                            ),
                        });
                    }
                    // `state` is left untouched so that the broker reports the
                    // transition again on the next heartbeat.
                    Err(error) => {
                        log::warn!(
                            "allocation ID {allocation_id}: [+{elapsed:.1}s] cannot fetch granted targets: {error}"
                        );
                    }
                },
                AllocationState::Invalid => {
                    log::info!("allocation ID {allocation_id}: [+{elapsed:.1}s] now invalid");
                    return Ok(SubmitOutcome {
                        allocation_id: allocation_id.to_string(),
                        state: new_state,
                        allocated: Map::new(),
                    });
                }
                new_state => {
                    if new_state != state {
                        log::info!(
                            "allocation ID {allocation_id}: [+{elapsed:.1}s] state transition {state} -> {new_state}"
                        );
                    }
                    state = new_state;
                }
            }
        }
    }

    /// Sends one heartbeat; returns the new state if the broker reported a change.
    pub async fn keepalive(
        &self,
        allocation_id: &str,
        state: AllocationState,
    ) -> crate::Result<Option<AllocationState>> {
        let response = self
            .broker
            .request(
                Method::Put,
                "keepalive",
                Some(keepalive_request(allocation_id, state)),
            )
            .await?;
        Ok(keepalive_state(&response, allocation_id))
    }

    pub async fn fetch(&self, allocation_id: &str) -> crate::Result<AllocationRecord> {
        self.broker
            .request_as(Method::Get, &format!("allocation/{allocation_id}"), None)
            .await
    }

    /// Best-effort delete of an allocation.
    ///
    /// An unreachable broker and an allocation the broker no longer knows
    /// both count as released.
    pub async fn release(&self, allocation_id: &str) -> crate::Result<()> {
        match self
            .broker
            .request(Method::Delete, &format!("allocation/{allocation_id}"), None)
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if error.is_connectivity() => {
                log::warn!("{error}");
                Ok(())
            }
            Err(error) if error.is_invalid_allocation() => {
                log::debug!(
                    "{}: allocation {allocation_id} already released",
                    self.broker.aka()
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
