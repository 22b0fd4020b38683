//! JSON payloads exchanged with brokers.
//!
//! Responses are decoded leniently: brokers of different generations omit
//! fields, so every optional field has a default.
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::alloc::{AllocationId, AllocationRequest, AllocationState, Groups, TargetId};
use crate::{Map, Set};

/// `PUT allocation`
#[derive(Debug, Serialize)]
pub struct CreateAllocationRequest<'a> {
    pub priority: u32,
    pub preempt: bool,
    pub queue: bool,
    pub groups: &'a Groups,
    pub reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obo_user: Option<&'a str>,
}

impl<'a> From<&'a AllocationRequest> for CreateAllocationRequest<'a> {
    fn from(request: &'a AllocationRequest) -> Self {
        Self {
            priority: request.priority,
            preempt: request.preempt,
            queue: request.queue,
            groups: &request.groups,
            reason: request.reason.as_deref(),
            obo_user: request.on_behalf_of.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAllocationResponse {
    #[serde(default)]
    pub allocid: Option<AllocationId>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub group_allocated: Option<String>,
    #[serde(default, rename = "_message")]
    pub message: Option<String>,
}

/// Body of `PUT keepalive`: each allocation with the state we last saw.
pub fn keepalive_request(allocation_id: &str, state: AllocationState) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(
        allocation_id.to_string(),
        Value::String(state.as_str().to_string()),
    );
    Value::Object(body)
}

/// Brokers only report allocations whose state differs from what the
/// keepalive told them; `None` means no news.
pub fn keepalive_state(response: &Value, allocation_id: &str) -> Option<AllocationState> {
    match response.get(allocation_id)? {
        Value::Object(entry) => entry
            .get("state")
            .and_then(|state| state.as_str())
            .map(AllocationState::from_wire),
        Value::String(state) => Some(AllocationState::from_wire(state)),
        _ => None,
    }
}

/// `GET allocation/{id}` and the values of `GET allocation/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationRecord {
    pub state: AllocationState,
    pub creator: Option<String>,
    pub user: Option<String>,
    pub guests: Set<String>,
    pub reason: Option<String>,
    pub priority: Option<u32>,
    pub preempt: bool,
    pub target_group: BTreeMap<String, Vec<TargetId>>,
    pub group_allocated: Option<String>,
    #[serde(deserialize_with = "optional_number_or_string")]
    pub timestamp: Option<String>,
}

impl AllocationRecord {
    /// Keep records created by `username` or assigned to it.
    pub fn belongs_to(&self, username: &str) -> bool {
        self.creator.as_deref() == Some(username) || self.user.as_deref() == Some(username)
    }
}

/// Decodes an allocation listing, skipping entries this client cannot read.
pub fn parse_allocation_listing(broker: &str, value: Value) -> Map<AllocationId, AllocationRecord> {
    let Value::Object(entries) = value else {
        log::warn!("{broker}: allocation listing is not an object");
        return Map::new();
    };
    entries
        .into_iter()
        .filter_map(|(id, entry)| {
            if !entry.is_object() {
                return None;
            }
            match serde_json::from_value(entry) {
                Ok(record) => Some((id, record)),
                Err(error) => {
                    log::warn!("{broker}: cannot decode allocation {id}: {error}");
                    None
                }
            }
        })
        .collect()
}

/// `GET targets/`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TargetListResponse {
    pub targets: Vec<TargetEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TargetEntry {
    pub id: Option<TargetId>,
    pub disabled: Option<Value>,
    #[serde(rename = "_alloc")]
    pub alloc: TargetAllocInfo,
}

impl TargetEntry {
    pub fn is_disabled(&self) -> bool {
        match &self.disabled {
            None | Some(Value::Null) => false,
            Some(Value::Bool(disabled)) => *disabled,
            Some(Value::String(reason)) => !reason.is_empty(),
            Some(Value::Number(number)) => number.as_f64() != Some(0.0),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TargetAllocInfo {
    pub queue: Map<AllocationId, Value>,
}

impl TargetAllocInfo {
    /// Raw queue snapshot of a target; undecodable waiters are skipped.
    pub fn waiters(&self) -> Map<AllocationId, RawWaiter> {
        self.queue
            .iter()
            .filter_map(|(id, waiter)| match RawWaiter::deserialize(waiter) {
                Ok(waiter) => Some((id.clone(), waiter)),
                Err(error) => {
                    log::debug!("Ignoring waiter {id}: {error}");
                    None
                }
            })
            .collect()
    }
}

/// One pending request against a target, as reported by its broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawWaiter {
    pub priority: u32,
    #[serde(deserialize_with = "number_or_string")]
    pub timestamp: u64,
    #[serde(default)]
    pub preempt: bool,
    #[serde(default)]
    pub exclusive: bool,
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("timestamp is not a positive integer")),
        Value::String(text) => text.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "invalid timestamp {other}"
        ))),
    }
}

fn optional_number_or_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}
