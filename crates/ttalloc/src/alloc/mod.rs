//! Allocations are leases on a group of targets, issued by one broker.
//!
//! The client never owns authoritative allocation state. [`Allocation`] is a
//! mirror of what a broker last reported.
mod client;
mod hold;
mod request;

use std::fmt;

use chrono::NaiveDateTime;

use crate::broker::messages::AllocationRecord;
use crate::{Map, Set};

pub use client::{AllocationClient, SubmitOutcome};
pub use hold::HoldOutcome;
pub use request::{AllocationRequest, AllocationRequestBuilder, DEFAULT_PRIORITY, default_reason};

/// Allocation id, unique only within the broker that issued it.
pub type AllocationId = String;
pub type TargetId = String;

/// Requested target groups: group name -> targets that may satisfy it.
pub type Groups = Map<String, Set<TargetId>>;

/// Group used by single-group allocations, and for granted targets that
/// match none of the requested groups.
pub const ALLOCATION_GROUP: &str = "group";

/// Layout of broker timestamps (e.g. `20200305204652`).
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllocationState {
    Queued,
    Active,
    Invalid,
    RestartNeeded,
    #[default]
    Unknown,
}

impl AllocationState {
    pub fn from_wire(state: &str) -> Self {
        match state {
            "queued" => AllocationState::Queued,
            "active" => AllocationState::Active,
            "invalid" => AllocationState::Invalid,
            "restart-needed" => AllocationState::RestartNeeded,
            _ => AllocationState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationState::Queued => "queued",
            AllocationState::Active => "active",
            AllocationState::Invalid => "invalid",
            AllocationState::RestartNeeded => "restart-needed",
            AllocationState::Unknown => "unknown",
        }
    }

    /// States in which a held lease may be kept alive.
    pub fn is_holdable(&self) -> bool {
        matches!(
            self,
            AllocationState::Active | AllocationState::Queued | AllocationState::RestartNeeded
        )
    }
}

impl fmt::Display for AllocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for AllocationState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for AllocationState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = String::deserialize(deserializer)?;
        Ok(AllocationState::from_wire(&state))
    }
}

/// Splits the comma separated `group_allocated` value of a broker response.
pub fn parse_allocated_targets(value: &str) -> Vec<TargetId> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .collect()
}

/// Keys the targets of a `group_allocated` value by the requested group
/// they were granted from.
///
/// The broker grants at most one group, so the first requested group that
/// contains every granted target wins. Falls back to [`ALLOCATION_GROUP`].
pub fn allocated_groups<'a, I, T>(requested: I, value: &str) -> Map<String, Vec<TargetId>>
where
    I: IntoIterator<Item = (&'a String, T)>,
    T: IntoIterator<Item = &'a TargetId>,
{
    let targets = parse_allocated_targets(value);
    if targets.is_empty() {
        return Map::new();
    }
    let name = requested
        .into_iter()
        .find_map(|(name, members)| {
            let members: Set<&TargetId> = members.into_iter().collect();
            targets
                .iter()
                .all(|target| members.contains(target))
                .then(|| name.clone())
        })
        .unwrap_or_else(|| ALLOCATION_GROUP.to_string());

    let mut groups = Map::new();
    groups.insert(name, targets);
    groups
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub id: AllocationId,
    /// Alias of the broker that owns the allocation.
    pub broker: String,
    pub state: AllocationState,
    pub creator: Option<String>,
    pub on_behalf_of: Option<String>,
    pub priority: Option<u32>,
    pub preempt: bool,
    pub requested_groups: Map<String, Vec<TargetId>>,
    /// Empty unless the allocation is active.
    pub allocated_groups: Map<String, Vec<TargetId>>,
    pub guests: Set<String>,
    pub reason: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl Allocation {
    pub fn from_record(broker: &str, id: &str, record: AllocationRecord) -> Self {
        let AllocationRecord {
            state,
            creator,
            user,
            guests,
            reason,
            priority,
            preempt,
            target_group,
            group_allocated,
            timestamp,
        } = record;

        let on_behalf_of = match (&creator, user) {
            (Some(creator), Some(user)) if &user != creator => Some(user),
            (None, user) => user,
            _ => None,
        };
        let created_at = timestamp
            .as_deref()
            .and_then(|ts| NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok());
        let allocated = match (state, group_allocated.as_deref()) {
            (AllocationState::Active, Some(value)) => allocated_groups(&target_group, value),
            _ => Map::new(),
        };

        Self {
            id: id.to_string(),
            broker: broker.to_string(),
            state,
            creator,
            on_behalf_of,
            priority,
            preempt,
            requested_groups: target_group.into_iter().collect(),
            allocated_groups: allocated,
            guests,
            reason,
            created_at,
        }
    }

    /// Broker qualified id, in the `alias/id` form accepted by the dispatcher.
    pub fn full_id(&self) -> String {
        format!("{}/{}", self.broker, self.id)
    }

    /// The user the allocation serves.
    pub fn user(&self) -> Option<&str> {
        self.on_behalf_of.as_deref().or(self.creator.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::{Allocation, AllocationState, allocated_groups, parse_allocated_targets};
    use crate::tests::utils::groups;
    use crate::broker::messages::AllocationRecord;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn state_wire_names() {
        for state in [
            AllocationState::Queued,
            AllocationState::Active,
            AllocationState::Invalid,
            AllocationState::RestartNeeded,
        ] {
            assert_eq!(AllocationState::from_wire(state.as_str()), state);
        }
        assert_eq!(
            AllocationState::from_wire("busy"),
            AllocationState::Unknown
        );
    }

    #[test]
    fn holdable_states() {
        assert!(AllocationState::Active.is_holdable());
        assert!(AllocationState::Queued.is_holdable());
        assert!(AllocationState::RestartNeeded.is_holdable());
        assert!(!AllocationState::Invalid.is_holdable());
        assert!(!AllocationState::Unknown.is_holdable());
    }

    #[test]
    fn split_allocated_targets() {
        assert_eq!(parse_allocated_targets("t1,t2, t3"), vec!["t1", "t2", "t3"]);
        assert!(parse_allocated_targets("").is_empty());
    }

    #[test]
    fn mirror_from_record() {
        let record: AllocationRecord = serde_json::from_value(json!({
            "state": "active",
            "creator": "alice",
            "user": "bob",
            "guests": ["carol"],
            "priority": 500,
            "preempt": true,
            "target_group": {"group": ["t1", "t2", "t3"]},
            "group_allocated": "t2",
            "timestamp": 20200305204652u64,
            "reason": "nightly",
        }))
        .unwrap();
        let allocation = Allocation::from_record("b1", "A1", record);
        assert_eq!(allocation.full_id(), "b1/A1");
        assert_eq!(allocation.state, AllocationState::Active);
        assert_eq!(allocation.on_behalf_of.as_deref(), Some("bob"));
        assert_eq!(allocation.user(), Some("bob"));
        assert!(allocation.guests.contains("carol"));
        assert_eq!(allocation.requested_groups["group"], vec!["t1", "t2", "t3"]);
        assert_eq!(allocation.allocated_groups.len(), 1);
        assert_eq!(allocation.allocated_groups["group"], vec!["t2"]);
        assert_eq!(
            allocation.created_at,
            NaiveDate::from_ymd_opt(2020, 3, 5)
                .unwrap()
                .and_hms_opt(20, 46, 52)
        );
    }

    #[test]
    fn creator_only_record() {
        let record: AllocationRecord =
            serde_json::from_value(json!({"state": "queued", "creator": "alice", "user": "alice"}))
                .unwrap();
        let allocation = Allocation::from_record("b1", "A2", record);
        assert_eq!(allocation.on_behalf_of, None);
        assert_eq!(allocation.user(), Some("alice"));
        assert!(allocation.allocated_groups.is_empty());
    }

    #[test]
    fn queued_record_has_no_allocated_groups() {
        let record: AllocationRecord = serde_json::from_value(json!({
            "state": "queued",
            "target_group": {"group": ["t1", "t2"]},
            "group_allocated": "t1",
        }))
        .unwrap();
        let allocation = Allocation::from_record("b1", "A3", record);
        assert_eq!(allocation.requested_groups["group"], vec!["t1", "t2"]);
        assert!(allocation.allocated_groups.is_empty());
    }

    #[test]
    fn granted_targets_are_keyed_by_their_group() {
        let requested = groups(&[("small", &["t1", "t4"]), ("big", &["t2", "t3"])]);
        let granted = allocated_groups(&requested, "t3,t2");
        assert_eq!(granted.len(), 1);
        assert_eq!(granted["big"], vec!["t3", "t2"]);

        let granted = allocated_groups(&requested, "t9");
        assert_eq!(granted["group"], vec!["t9"]);
        assert!(allocated_groups(&requested, "").is_empty());
    }
}
