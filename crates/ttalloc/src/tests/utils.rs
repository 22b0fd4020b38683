use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::LevelFilter;
use serde_json::{Value, json};

use crate::alloc::Groups;
use crate::broker::{Broker, BrokerRegistry};
use crate::transport::{Method, Transport, TransportFailure, TransportFuture, TransportResult};
use crate::{Map, Set};

pub fn init_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn groups(entries: &[(&str, &[&str])]) -> Groups {
    entries
        .iter()
        .map(|(name, targets)| {
            (
                name.to_string(),
                targets.iter().map(|t| t.to_string()).collect::<Set<_>>(),
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Default)]
struct MockState {
    /// One-shot responses, consumed in order.
    scripted: Map<(Method, String), VecDeque<TransportResult>>,
    /// Used when no one-shot response is left.
    sticky: Map<(Method, String), TransportResult>,
    requests: Vec<RecordedRequest>,
}

/// Scriptable broker stand-in. Requests without a scripted response succeed
/// with an empty object.
pub struct MockTransport {
    username: Option<String>,
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new(username: &str) -> Arc<Self> {
        Arc::new(Self {
            username: Some(username.to_string()),
            state: Default::default(),
        })
    }

    pub fn anonymous() -> Arc<Self> {
        Arc::new(Self {
            username: None,
            state: Default::default(),
        })
    }

    fn push(&self, method: Method, path: &str, result: TransportResult) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry((method, path.to_string()))
            .or_default()
            .push_back(result);
    }

    pub fn respond(&self, method: Method, path: &str, value: Value) {
        self.push(method, path, Ok(value));
    }

    pub fn respond_always(&self, method: Method, path: &str, value: Value) {
        self.state
            .lock()
            .unwrap()
            .sticky
            .insert((method, path.to_string()), Ok(value));
    }

    pub fn fail_connection(&self, method: Method, path: &str) {
        self.state.lock().unwrap().sticky.insert(
            (method, path.to_string()),
            Err(TransportFailure::Connection("connection refused".to_string())),
        );
    }

    pub fn fail_connection_once(&self, method: Method, path: &str) {
        self.push(
            method,
            path,
            Err(TransportFailure::Connection("connection reset".to_string())),
        );
    }

    pub fn fail_http(&self, method: Method, path: &str, status: u16, message: &str) {
        self.state.lock().unwrap().sticky.insert(
            (method, path.to_string()),
            Err(TransportFailure::Http {
                status,
                message: message.to_string(),
            }),
        );
    }

    pub fn fail_http_once(&self, method: Method, path: &str, status: u16, message: &str) {
        self.push(
            method,
            path,
            Err(TransportFailure::Http {
                status,
                message: message.to_string(),
            }),
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

impl Transport for MockTransport {
    fn send_request(&self, method: Method, path: &str, body: Option<Value>) -> TransportFuture<'_> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(RecordedRequest {
                method,
                path: path.to_string(),
                body,
            });
            let key = (method, path.to_string());
            match state.scripted.get_mut(&key).and_then(|queue| queue.pop_front()) {
                Some(result) => result,
                None => state.sticky.get(&key).cloned().unwrap_or_else(|| Ok(json!({}))),
            }
        };
        Box::pin(async move { result })
    }

    fn logged_in_username(&self) -> Option<String> {
        self.username.clone()
    }
}

/// Registry of mock brokers, each logged in as `user-<alias>`.
pub fn mock_registry(aliases: &[&str]) -> (BrokerRegistry, Vec<Arc<MockTransport>>) {
    let transports: Vec<_> = aliases
        .iter()
        .map(|aka| MockTransport::new(&format!("user-{aka}")))
        .collect();
    let brokers = aliases
        .iter()
        .zip(&transports)
        .map(|(aka, transport)| Broker::new(*aka, transport.clone()))
        .collect();
    (BrokerRegistry::new(brokers).unwrap(), transports)
}
