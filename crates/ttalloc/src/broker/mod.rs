//! Brokers and the registry that resolves aliases to them.
mod id;
pub mod messages;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::common::config::ClientConfig;
use crate::common::error::AllocError;
use crate::transport::http::HttpTransport;
use crate::transport::{Method, Transport, TransportFailure, normalize_response};
use crate::{Map, Set};

pub use id::{AllocationRef, TargetRef};

/// One independent allocation server.
///
/// Every response passes through [`normalize_response`] here, so nothing
/// above this type needs to know about legacy response shapes.
#[derive(Clone)]
pub struct Broker {
    aka: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").field("aka", &self.aka).finish()
    }
}

impl Broker {
    pub fn new(aka: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            aka: aka.into(),
            transport,
        }
    }

    pub fn aka(&self) -> &str {
        &self.aka
    }

    pub fn logged_in_username(&self) -> Option<String> {
        self.transport.logged_in_username()
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> crate::Result<Value> {
        log::debug!("{}: {method} {path}", self.aka);
        match self.transport.send_request(method, path, body).await {
            Ok(value) => Ok(normalize_response(value)),
            Err(TransportFailure::Connection(message)) => Err(AllocError::Transport {
                broker: self.aka.clone(),
                message,
            }),
            Err(TransportFailure::Http { status, message }) => Err(AllocError::BrokerHttp {
                broker: self.aka.clone(),
                status,
                message,
            }),
            Err(TransportFailure::Decode(message)) => Err(AllocError::Protocol(format!(
                "{}: {method} {path}: {message}",
                self.aka
            ))),
        }
    }

    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> crate::Result<T> {
        let value = self.request(method, path, body).await?;
        serde_json::from_value(value).map_err(|error| {
            AllocError::Protocol(format!("{}: {method} {path}: {error}", self.aka))
        })
    }
}

/// Which brokers an operation on an [`AllocationRef`] has to reach.
#[derive(Debug, Clone)]
pub enum BrokerScope {
    /// The broker named by the allocation id.
    Owner(Broker),
    /// Owner unknown; try every configured broker.
    Scatter(Vec<Broker>),
}

impl BrokerScope {
    pub fn brokers(&self) -> &[Broker] {
        match self {
            BrokerScope::Owner(broker) => std::slice::from_ref(broker),
            BrokerScope::Scatter(brokers) => brokers,
        }
    }

    pub fn is_scatter(&self) -> bool {
        matches!(self, BrokerScope::Scatter(_))
    }
}

/// The set of configured brokers, constructed once and passed explicitly to
/// every component that needs to resolve an alias.
#[derive(Debug, Clone, Default)]
pub struct BrokerRegistry {
    brokers: Vec<Broker>,
}

impl BrokerRegistry {
    pub fn new(brokers: Vec<Broker>) -> crate::Result<Self> {
        let mut aliases = Set::new();
        for broker in &brokers {
            if !aliases.insert(broker.aka().to_string()) {
                return Err(AllocError::Config(format!(
                    "Server alias {} is used more than once",
                    broker.aka()
                )));
            }
        }
        Ok(Self { brokers })
    }

    pub fn from_config(config: &ClientConfig) -> crate::Result<Self> {
        let brokers = config
            .brokers
            .iter()
            .map(|broker| {
                let transport = HttpTransport::new(broker, config)?;
                log::debug!("Added server {} at {}", broker.alias()?, transport.base_url());
                Ok(Broker::new(broker.alias()?, Arc::new(transport)))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::new(brokers)
    }

    pub fn brokers(&self) -> &[Broker] {
        &self.brokers
    }

    pub fn get(&self, aka: &str) -> Option<&Broker> {
        self.brokers.iter().find(|broker| broker.aka() == aka)
    }

    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }

    /// Scope for operations where an unknown alias is an error.
    ///
    /// A bare id is tried on every broker.
    pub fn resolve_strict(&self, allocation: &AllocationRef) -> crate::Result<BrokerScope> {
        match &allocation.broker {
            Some(aka) => self
                .get(aka)
                .cloned()
                .map(BrokerScope::Owner)
                .ok_or_else(|| AllocError::UnknownBroker(aka.clone())),
            None => self.scatter(),
        }
    }

    /// Scope for release: an unknown alias falls back to every broker.
    pub fn resolve_lenient(&self, allocation: &AllocationRef) -> crate::Result<BrokerScope> {
        match &allocation.broker {
            Some(aka) => match self.get(aka) {
                Some(broker) => Ok(BrokerScope::Owner(broker.clone())),
                None => {
                    log::warn!("{aka}: unknown server name, trying all servers");
                    self.scatter()
                }
            },
            None => self.scatter(),
        }
    }

    fn scatter(&self) -> crate::Result<BrokerScope> {
        match self.brokers.as_slice() {
            [] => Err(AllocError::NoBrokers),
            [broker] => Ok(BrokerScope::Owner(broker.clone())),
            brokers => Ok(BrokerScope::Scatter(brokers.to_vec())),
        }
    }

    /// Groups targets by owning broker, insisting that there is exactly one.
    pub fn single_owner<'a>(
        &self,
        targets: impl IntoIterator<Item = &'a TargetRef>,
    ) -> crate::Result<(Broker, Vec<String>)> {
        let mut by_broker: Map<&str, Vec<String>> = Map::new();
        for target in targets {
            by_broker
                .entry(target.broker.as_str())
                .or_default()
                .push(target.id.clone());
        }
        if by_broker.len() > 1 {
            let mut aliases: Vec<String> = by_broker.keys().map(|aka| aka.to_string()).collect();
            aliases.sort();
            return Err(AllocError::MixedBrokers(aliases));
        }
        let Some((aka, ids)) = by_broker.into_iter().next() else {
            return Err(AllocError::Config("No targets given".to_string()));
        };
        let broker = self
            .get(aka)
            .cloned()
            .ok_or_else(|| AllocError::UnknownBroker(aka.to_string()))?;
        Ok((broker, ids))
    }
}
