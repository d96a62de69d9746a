//! # Failure policy: expendable devices and collection nMin accounting.
//!
//! [`FailurePolicy`] answers one question, always under the core mutex: can
//! this device failure be absorbed, or must it fail the in-flight
//! operations?
//!
//! ## Decision ladder
//! ```text
//! absorb(task)
//!   ├─► already ignored            → absorbed
//!   ├─► expendable                 → ignore device, absorbed
//!   ├─► in a collection
//!   │     ├─► n_min == 0          → NOT absorbed (no minimum defined)
//!   │     ├─► --n_current < n_min → NOT absorbed
//!   │     └─► otherwise           → ignore whole collection, absorbed
//!   └─► standalone, not expendable → NOT absorbed
//! ```
//!
//! ## Rules
//! - `n_current` counts intact instances of a collection type; it is only
//!   ever decremented here, once per failing instance.
//! - Absorbing a collection failure ignores **every** device of that
//!   runtime collection, clearing their subscription flags.
//! - Collection-id → type-name resolution is captured at construction, so
//!   no deployment-service call happens while the core mutex is held.

use std::collections::HashMap;

use tracing::{debug, error, info};

use super::{CollectionId, StateTable, TaskId};

/// Accounting for one collection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Minimum number of intact instances required; `0` = no minimum.
    pub n_min: u32,
    /// Current number of intact instances. Never incremented by the core.
    pub n_current: u32,
}

/// Decides whether device failures abort operations or are tolerated.
pub struct FailurePolicy {
    /// Per-type accounting, keyed by collection type name.
    collections: HashMap<String, CollectionInfo>,
    /// Runtime collection id → type name, captured at attachment.
    names: HashMap<CollectionId, String>,
}

impl FailurePolicy {
    pub fn new(
        collections: HashMap<String, CollectionInfo>,
        names: HashMap<CollectionId, String>,
    ) -> Self {
        Self { collections, names }
    }

    /// Current intact-instance count for a collection type.
    pub fn n_current(&self, name: &str) -> Option<u32> {
        self.collections.get(name).map(|info| info.n_current)
    }

    /// Applies the failure ladder to one failed device.
    ///
    /// Returns `true` when the failure is absorbed. Mutates the table
    /// (ignore flags, publisher count) and the collection accounting.
    /// Precondition: the core mutex is held.
    pub fn absorb(&mut self, table: &mut StateTable, task_id: TaskId) -> bool {
        let Some(device) = table.get(task_id) else {
            return false;
        };

        if device.ignored {
            debug!(task = task_id, "failed device is already ignored");
            return true;
        }

        if device.expendable {
            debug!(task = task_id, "failed device is expendable, ignoring");
            table.ignore(task_id);
            return true;
        }

        let collection_id = device.collection_id;
        if collection_id != 0 {
            if let Some(name) = self.names.get(&collection_id) {
                if let Some(info) = self.collections.get_mut(name) {
                    // one instance of this type failed
                    info.n_current = info.n_current.saturating_sub(1);
                    if info.n_min == 0 {
                        error!(
                            task = task_id,
                            collection = %name,
                            "failed collection has no minimum defined, failure cannot be absorbed"
                        );
                        return false;
                    }
                    if info.n_current < info.n_min {
                        error!(
                            task = task_id,
                            collection = %name,
                            n_current = info.n_current,
                            n_min = info.n_min,
                            "collection dropped below its minimum, failure cannot be absorbed"
                        );
                        return false;
                    }
                    info!(
                        task = task_id,
                        collection = %name,
                        n_current = info.n_current,
                        n_min = info.n_min,
                        "ignoring failed collection, remaining instances satisfy the minimum"
                    );
                    table.ignore_collection(collection_id);
                    return true;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn policy(n_min: u32, n_current: u32) -> FailurePolicy {
        FailurePolicy::new(
            HashMap::from([("workers".to_string(), CollectionInfo { n_min, n_current })]),
            HashMap::from([(7, "workers".to_string()), (8, "workers".to_string())]),
        )
    }

    #[test]
    fn already_ignored_device_is_absorbed() {
        let mut table = StateTable::new([(1, 0)], &HashSet::new());
        table.ignore(1);
        let mut p = policy(0, 0);
        assert!(p.absorb(&mut table, 1));
    }

    #[test]
    fn expendable_device_is_ignored_and_absorbed() {
        let mut table = StateTable::new([(1, 0)], &HashSet::from([1]));
        let mut p = policy(0, 0);
        assert!(p.absorb(&mut table, 1));
        assert!(table.get(1).unwrap().ignored);
    }

    #[test]
    fn collection_without_minimum_cannot_absorb() {
        let mut table = StateTable::new([(1, 7)], &HashSet::new());
        let mut p = policy(0, 3);
        assert!(!p.absorb(&mut table, 1));
        assert!(!table.get(1).unwrap().ignored);
    }

    #[test]
    fn satisfied_minimum_ignores_the_whole_instance() {
        let mut table = StateTable::new([(1, 7), (2, 7), (3, 8)], &HashSet::new());
        table.confirm_subscribed(2);
        let mut p = policy(2, 3);
        assert!(p.absorb(&mut table, 1));
        assert!(table.get(1).unwrap().ignored);
        assert!(table.get(2).unwrap().ignored);
        assert!(!table.get(2).unwrap().subscribed);
        assert!(!table.get(3).unwrap().ignored);
        assert_eq!(p.n_current("workers"), Some(2));
    }

    #[test]
    fn minimum_violation_fails_and_decrements_once() {
        let mut table = StateTable::new([(1, 7), (2, 8)], &HashSet::new());
        let mut p = policy(2, 2);
        assert!(!p.absorb(&mut table, 1));
        assert_eq!(p.n_current("workers"), Some(1));
        // the second instance falls below as well
        assert!(!p.absorb(&mut table, 2));
        assert_eq!(p.n_current("workers"), Some(0));
    }

    #[test]
    fn standalone_non_expendable_device_is_not_absorbed() {
        let mut table = StateTable::new([(1, 0)], &HashSet::new());
        let mut p = policy(2, 3);
        assert!(!p.absorb(&mut table, 1));
    }
}
