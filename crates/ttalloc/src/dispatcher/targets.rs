use std::collections::BTreeMap;

use crate::broker::TargetRef;
use crate::broker::messages::TargetListResponse;
use crate::common::error::AllocError;

/// Targets known to the configured brokers, keyed by `alias/target`.
#[derive(Debug, Clone, Default)]
pub struct TargetInventory {
    targets: BTreeMap<String, TargetRef>,
}

impl TargetInventory {
    /// Builds the inventory from the target listings of each broker.
    pub fn from_listings(
        listings: impl IntoIterator<Item = (String, TargetListResponse)>,
        include_disabled: bool,
    ) -> Self {
        let mut targets = BTreeMap::new();
        for (broker, listing) in listings {
            for entry in listing.targets {
                let Some(id) = entry.id.as_deref() else {
                    continue;
                };
                if entry.is_disabled() && !include_disabled {
                    log::debug!("{broker}/{id}: skipping disabled target");
                    continue;
                }
                let target = TargetRef::new(broker.as_str(), id);
                targets.insert(target.to_string(), target);
            }
        }
        Self { targets }
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetRef> {
        self.targets.values()
    }

    pub fn get(&self, fullid: &str) -> Option<&TargetRef> {
        self.targets.get(fullid)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Maps target names to their owners.
    ///
    /// A name is either a fullid `alias/target` or a bare target id, which
    /// must then be unique across brokers.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> crate::Result<Vec<TargetRef>> {
        names
            .iter()
            .map(|name| self.resolve_one(name.as_ref()))
            .collect()
    }

    fn resolve_one(&self, name: &str) -> crate::Result<TargetRef> {
        if let Some(target) = self.targets.get(name) {
            return Ok(target.clone());
        }
        let candidates: Vec<&TargetRef> = self
            .targets
            .values()
            .filter(|target| target.id == name)
            .collect();
        match candidates.as_slice() {
            [] => Err(AllocError::Config(format!("{name}: unknown target"))),
            [target] => Ok((*target).clone()),
            candidates => Err(AllocError::Config(format!(
                "{name}: ambiguous target name, use one of {}",
                candidates
                    .iter()
                    .map(|target| target.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TargetInventory;
    use crate::broker::TargetRef;
    use crate::broker::messages::TargetListResponse;
    use crate::common::error::AllocError;
    use serde_json::json;

    fn inventory(include_disabled: bool) -> TargetInventory {
        let listing = |value: serde_json::Value| -> TargetListResponse {
            serde_json::from_value(value).unwrap()
        };
        TargetInventory::from_listings(
            vec![
                (
                    "b1".to_string(),
                    listing(json!({"targets": [
                        {"id": "t1"},
                        {"id": "shared"},
                        {"id": "broken", "disabled": "power supply"},
                    ]})),
                ),
                (
                    "b2".to_string(),
                    listing(json!({"targets": [{"id": "t2"}, {"id": "shared"}, {}]})),
                ),
            ],
            include_disabled,
        )
    }

    #[test]
    fn disabled_targets_are_skipped() {
        assert_eq!(inventory(false).len(), 4);
        let inventory = inventory(true);
        assert_eq!(inventory.len(), 5);
        assert_eq!(
            inventory.get("b1/broken"),
            Some(&TargetRef::new("b1", "broken"))
        );
    }

    #[test]
    fn resolve_names() {
        let inventory = inventory(false);
        let resolved = inventory.resolve(&["t1", "b2/shared", "t2"]).unwrap();
        assert_eq!(
            resolved,
            vec![
                TargetRef::new("b1", "t1"),
                TargetRef::new("b2", "shared"),
                TargetRef::new("b2", "t2"),
            ]
        );
    }

    #[test]
    fn resolve_rejects_unknown_and_ambiguous_names() {
        let inventory = inventory(false);
        assert!(matches!(
            inventory.resolve(&["nope"]),
            Err(AllocError::Config(message)) if message.contains("unknown target")
        ));
        assert!(matches!(
            inventory.resolve(&["shared"]),
            Err(AllocError::Config(message)) if message.contains("b1/shared, b2/shared")
        ));
    }
}
