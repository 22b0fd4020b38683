use std::fmt;

use crate::alloc::{AllocationId, TargetId};

/// Allocation id as typed by a user: `alias/id` or a bare `id`.
///
/// Allocation ids are only unique within a broker, so a bare id is ambiguous
/// when more than one broker is configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllocationRef {
    pub broker: Option<String>,
    pub id: AllocationId,
}

impl AllocationRef {
    pub fn parse(value: &str) -> Self {
        match value.split_once('/') {
            Some((broker, id)) => Self {
                broker: Some(broker.to_string()),
                id: id.to_string(),
            },
            None => Self {
                broker: None,
                id: value.to_string(),
            },
        }
    }

    pub fn qualified(broker: &str, id: &str) -> Self {
        Self {
            broker: Some(broker.to_string()),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for AllocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.broker {
            Some(broker) => write!(f, "{broker}/{}", self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// A target together with the alias of the broker that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetRef {
    pub broker: String,
    pub id: TargetId,
}

impl TargetRef {
    pub fn new(broker: impl Into<String>, id: impl Into<TargetId>) -> Self {
        Self {
            broker: broker.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.broker, self.id)
    }
}
