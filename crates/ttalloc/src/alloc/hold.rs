use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::alloc::{AllocationClient, AllocationState};

/// Why a hold loop stopped. Releasing the allocation is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldOutcome {
    /// The requested hold duration elapsed.
    Expired,
    /// The broker reported a state in which the lease can't be kept.
    Terminal(AllocationState),
    Cancelled,
}

impl AllocationClient {
    /// Keeps a granted lease alive with a heartbeat every hold period.
    ///
    /// `max_hold` of zero holds until the broker or `cancel` ends it.
    pub async fn hold(
        &self,
        allocation_id: &str,
        initial_state: AllocationState,
        max_hold: Duration,
        cancel: &CancellationToken,
    ) -> HoldOutcome {
        let started = Instant::now();
        let mut state = initial_state;
        loop {
            tokio::select! {
                _ = sleep(self.hold_period) => {}
                _ = cancel.cancelled() => return HoldOutcome::Cancelled,
            }
            let elapsed = started.elapsed();
            if !max_hold.is_zero() && elapsed >= max_hold {
                log::info!(
                    "allocation ID {allocation_id}: [+{:.1}s] hold time expired",
                    elapsed.as_secs_f64()
                );
                return HoldOutcome::Expired;
            }

            match self.keepalive(allocation_id, state).await {
                Ok(Some(new_state)) => {
                    if !new_state.is_holdable() {
                        log::info!(
                            "allocation ID {allocation_id}: [+{:.1}s] can't keep alive in state '{new_state}'",
                            elapsed.as_secs_f64()
                        );
                        return HoldOutcome::Terminal(new_state);
                    }
                    if new_state != state {
                        log::info!(
                            "allocation ID {allocation_id}: [+{:.1}s] state transition {state} -> {new_state}",
                            elapsed.as_secs_f64()
                        );
                    }
                    state = new_state;
                }
                // Only states reported by the broker end the hold.
                Ok(None) => {}
                Err(error) => {
                    log::warn!("allocation ID {allocation_id}: keepalive failed: {error}");
                    continue;
                }
            }
            log::info!(
                "allocation ID {allocation_id}: [+{:.1}s] keeping alive during state '{state}'",
                elapsed.as_secs_f64()
            );
        }
    }
}
