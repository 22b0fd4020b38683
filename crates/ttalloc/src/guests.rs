//! Secondary users of an allocation.
//!
//! Only the creator or the on-behalf-of user may change guests; the broker
//! enforces that, not this client.
use std::sync::Arc;

use crate::Set;
use crate::broker::messages::AllocationRecord;
use crate::broker::{AllocationRef, Broker, BrokerRegistry};
use crate::dispatcher::{BatchReport, UnitOutcome};
use crate::transport::Method;

#[derive(Debug, Clone)]
pub struct GuestAccessManager {
    registry: Arc<BrokerRegistry>,
}

impl GuestAccessManager {
    pub fn new(registry: Arc<BrokerRegistry>) -> Self {
        Self { registry }
    }

    /// Adds each guest with its own request; failures don't stop the rest.
    pub async fn add<S: AsRef<str>>(
        &self,
        allocation: &str,
        guests: &[S],
    ) -> crate::Result<BatchReport> {
        let allocation = AllocationRef::parse(allocation);
        let scope = self.registry.resolve_strict(&allocation)?;
        let mut report = BatchReport::default();
        for broker in scope.brokers() {
            for guest in guests {
                let guest = guest.as_ref();
                let result = broker
                    .request(Method::Patch, &guest_path(&allocation.id, guest), None)
                    .await
                    .map(|_| ());
                if let Err(error) = &result {
                    log::warn!("{}: can't add guest {guest}: {error}", allocation.id);
                }
                report.push(UnitOutcome::new(guest, Some(broker.aka()), result));
            }
        }
        Ok(report)
    }

    /// Current guests of an allocation.
    ///
    /// With a bare id the guests found on every broker that knows the
    /// allocation are merged.
    pub async fn list(&self, allocation: &str) -> crate::Result<Set<String>> {
        let allocation = AllocationRef::parse(allocation);
        let scope = self.registry.resolve_strict(&allocation)?;
        let mut guests = Set::new();
        let mut last_error = None;
        let mut answered = false;
        for broker in scope.brokers() {
            match fetch_guests(broker, &allocation.id).await {
                Ok(found) => {
                    answered = true;
                    guests.extend(found);
                }
                Err(error) if scope.is_scatter() => {
                    log::debug!("{}: {error}", allocation.id);
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        match last_error {
            Some(error) if !answered => Err(error),
            _ => Ok(guests),
        }
    }

    /// Removes guests; an empty `guests` removes everyone.
    ///
    /// "Everyone" is whoever is a guest when this call fetches the list.
    /// Guests added afterwards are kept.
    pub async fn remove<S: AsRef<str>>(
        &self,
        allocation: &str,
        guests: &[S],
    ) -> crate::Result<BatchReport> {
        let allocation = AllocationRef::parse(allocation);
        let scope = self.registry.resolve_strict(&allocation)?;
        let mut report = BatchReport::default();
        for broker in scope.brokers() {
            let names: Vec<String> = if guests.is_empty() {
                match fetch_guests(broker, &allocation.id).await {
                    Ok(found) => found.into_iter().collect(),
                    Err(error) if scope.is_scatter() => {
                        log::debug!("{}: {error}", allocation.id);
                        continue;
                    }
                    Err(error) => return Err(error),
                }
            } else {
                guests.iter().map(|g| g.as_ref().to_string()).collect()
            };

            for guest in names {
                let result = broker
                    .request(Method::Delete, &guest_path(&allocation.id, &guest), None)
                    .await
                    .map(|_| ());
                if let Err(error) = &result {
                    log::error!("{}: can't remove guest {guest}: {error}", allocation.id);
                }
                report.push(UnitOutcome::new(guest, Some(broker.aka()), result));
            }
        }
        Ok(report)
    }
}

fn guest_path(allocation_id: &str, guest: &str) -> String {
    format!("allocation/{allocation_id}/{guest}")
}

async fn fetch_guests(broker: &Broker, allocation_id: &str) -> crate::Result<Set<String>> {
    let record: AllocationRecord = broker
        .request_as(Method::Get, &format!("allocation/{allocation_id}"), None)
        .await?;
    Ok(record.guests)
}
