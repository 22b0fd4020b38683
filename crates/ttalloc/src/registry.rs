//! Allocations visible to the caller, across all brokers.
use crate::Map;
use crate::alloc::{Allocation, AllocationId};
use crate::broker::messages::{AllocationRecord, parse_allocation_listing};
use crate::dispatcher::Dispatcher;
use crate::transport::Method;

/// Filter value standing for the identity each broker knows us by.
pub const SELF_USER: &str = "self";

pub type AllocationListing = Map<String, Map<AllocationId, AllocationRecord>>;

#[derive(Debug, Clone)]
pub struct AllocationRegistry {
    dispatcher: Dispatcher,
}

impl AllocationRegistry {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Lists allocations on every broker, keyed by broker alias.
    ///
    /// A `username` keeps the records it created or that were created for
    /// it. A broker that can't be listed yields an empty entry.
    pub async fn list(&self, username: Option<&str>) -> AllocationListing {
        let username = username.map(|name| name.to_string());
        let mut listing = self
            .dispatcher
            .fan_out(|broker| {
                let username = username.clone();
                async move {
                    let response = broker.request(Method::Get, "allocation/", None).await?;
                    let records = parse_allocation_listing(broker.aka(), response);
                    let filter = match username.as_deref() {
                        Some(SELF_USER) => match broker.logged_in_username() {
                            Some(identity) => Some(identity),
                            None => {
                                log::warn!(
                                    "{}: unknown logged in user, not filtering",
                                    broker.aka()
                                );
                                None
                            }
                        },
                        other => other.map(|name| name.to_string()),
                    };
                    Ok::<_, crate::Error>(match filter {
                        Some(user) => records
                            .into_iter()
                            .filter(|(_, record)| record.belongs_to(&user))
                            .collect(),
                        None => records,
                    })
                }
            })
            .await;

        for broker in self.dispatcher.registry().brokers() {
            listing.entry(broker.aka().to_string()).or_default();
        }
        listing
    }

    /// Same as [`AllocationRegistry::list`], flattened and ordered by
    /// `alias/id`.
    pub async fn allocations(&self, username: Option<&str>) -> Vec<Allocation> {
        let mut allocations: Vec<Allocation> = self
            .list(username)
            .await
            .into_iter()
            .flat_map(|(broker, records)| {
                records
                    .into_iter()
                    .map(move |(id, record)| Allocation::from_record(&broker, &id, record))
            })
            .collect();
        allocations.sort_by_key(|allocation| allocation.full_id());
        allocations
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::AllocationRegistry;
    use crate::broker::{Broker, BrokerRegistry};
    use crate::common::config::ClientConfig;
    use crate::dispatcher::Dispatcher;
    use crate::tests::utils::{MockTransport, init_logging, mock_registry};
    use crate::transport::Method;

    fn listing() -> serde_json::Value {
        json!({
            "A1": {"state": "active", "creator": "user-b1", "user": "user-b1"},
            "A2": {"state": "queued", "creator": "user-b2", "user": "user-b2"},
            "A3": {"state": "queued", "creator": "bot", "user": "user-b1"},
        })
    }

    fn registry(aliases: &[&str]) -> (AllocationRegistry, Vec<Arc<MockTransport>>) {
        init_logging();
        let (brokers, transports) = mock_registry(aliases);
        for transport in &transports {
            transport.respond_always(Method::Get, "allocation/", listing());
        }
        let dispatcher = Dispatcher::new(brokers, ClientConfig::default());
        (AllocationRegistry::new(dispatcher), transports)
    }

    fn ids(records: &crate::Map<String, super::AllocationRecord>) -> Vec<&str> {
        let mut ids: Vec<&str> = records.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn unfiltered_listing() {
        let (registry, _) = registry(&["b1", "b2"]);
        let listing = registry.list(None).await;
        assert_eq!(listing.len(), 2);
        assert_eq!(ids(&listing["b1"]), vec!["A1", "A2", "A3"]);
    }

    #[tokio::test]
    async fn self_is_resolved_per_broker() {
        let (registry, _) = registry(&["b1", "b2"]);
        let listing = registry.list(Some("self")).await;
        assert_eq!(ids(&listing["b1"]), vec!["A1", "A3"]);
        assert_eq!(ids(&listing["b2"]), vec!["A2"]);
    }

    #[tokio::test]
    async fn filter_by_creator_or_user() {
        let (registry, _) = registry(&["b1"]);
        let listing = registry.list(Some("bot")).await;
        assert_eq!(ids(&listing["b1"]), vec!["A3"]);
        let listing = registry.list(Some("nobody")).await;
        assert!(listing["b1"].is_empty());
    }

    #[tokio::test]
    async fn failing_broker_yields_empty_entry() {
        let (registry, transports) = registry(&["b1", "b2", "b3"]);
        transports[1].fail_connection(Method::Get, "allocation/");
        let listing = registry.list(None).await;
        assert_eq!(listing.len(), 3);
        assert_eq!(listing["b1"].len(), 3);
        assert!(listing["b2"].is_empty());
        assert_eq!(listing["b3"].len(), 3);
    }

    #[tokio::test]
    async fn self_without_identity_is_unfiltered() {
        init_logging();
        let transport = MockTransport::anonymous();
        transport.respond(Method::Get, "allocation/", listing());
        let brokers = BrokerRegistry::new(vec![Broker::new("b1", transport)]).unwrap();
        let registry = AllocationRegistry::new(Dispatcher::new(brokers, ClientConfig::default()));
        assert_eq!(registry.list(Some("self")).await["b1"].len(), 3);
    }

    #[tokio::test]
    async fn flattened_allocations() {
        let (registry, _) = registry(&["b2", "b1"]);
        let allocations = registry.allocations(Some("self")).await;
        let ids: Vec<String> = allocations.iter().map(|a| a.full_id()).collect();
        assert_eq!(ids, vec!["b1/A1", "b1/A3", "b2/A2"]);
        assert_eq!(allocations[1].on_behalf_of.as_deref(), Some("user-b1"));
    }
}
