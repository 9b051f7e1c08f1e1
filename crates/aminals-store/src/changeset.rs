//! Staged writes for a single event.
//!
//! A [`ChangeSet`] collects every entity write a handler makes while
//! processing one event. Reads go through the change set first and fall back
//! to the committed [`Store`], so a handler always sees its own earlier writes.
//! Nothing reaches the store until the caller takes the writes with
//! [`ChangeSet::into_writes`] and passes them to [`Store::commit`]; dropping the
//! change set discards them.
//!
//! ```
//! use aminals_store::prelude::*;
//!
//! let mut store = Store::new();
//! let alice = Address::from_low_u64(1);
//!
//! let mut changes = ChangeSet::new(&store);
//! let mut user = changes
//!     .get::<User>(&address_key(&alice))
//!     .unwrap_or_else(|| User::new(alice, 10));
//! user.created_at_block = 11;
//! changes.save(user);
//! assert_eq!(changes.len(), 1);
//!
//! let writes = changes.into_writes();
//! let applied = store.commit(writes);
//! assert!(applied[0].is_insert());
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::entity::{Entity, EntityKind, EntityRecord};
use crate::primitives::EntityKey;
use crate::store::Store;

/// Writes staged against a borrowed [`Store`].
#[derive(Debug)]
pub struct ChangeSet<'s> {
    base: &'s Store,
    staged: HashMap<(EntityKind, EntityKey), EntityRecord>,
    /// First-write order of staged records.
    order: Vec<(EntityKind, EntityKey)>,
}

impl<'s> ChangeSet<'s> {
    /// Start an empty change set over `base`.
    pub fn new(base: &'s Store) -> Self {
        Self {
            base,
            staged: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// The committed store this change set reads through to.
    pub fn base(&self) -> &'s Store {
        self.base
    }

    /// Load an owned copy of a typed entity, preferring the staged version.
    pub fn get<E: Entity>(&self, key: &EntityKey) -> Option<E> {
        match self.staged.get(&(E::KIND, key.clone())) {
            Some(record) => E::from_record(record).cloned(),
            None => self.base.get::<E>(key).cloned(),
        }
    }

    /// Whether an entity of type `E` exists, staged or committed.
    pub fn contains<E: Entity>(&self, key: &EntityKey) -> bool {
        self.staged.contains_key(&(E::KIND, key.clone())) || self.base.contains::<E>(key)
    }

    /// Stage an insert-or-replace of `entity`.
    ///
    /// Saving the same key twice keeps the last value but the position of the
    /// first write.
    pub fn save<E: Entity>(&mut self, entity: E) {
        let id = (E::KIND, entity.key().clone());
        if !self.staged.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.staged.insert(id, entity.into_record());
    }

    /// Entities of type `E` whose `field` references `target`, merging staged
    /// writes over committed state. Results are in key order.
    pub fn referencing<E: Entity>(&self, field: &str, target: &EntityKey) -> Vec<E> {
        let mut found: BTreeMap<EntityKey, E> = BTreeMap::new();

        for entity in self.base.referencing::<E>(field, target) {
            let id = (E::KIND, entity.key().clone());
            if !self.staged.contains_key(&id) {
                found.insert(entity.key().clone(), entity.clone());
            }
        }

        for ((kind, key), record) in &self.staged {
            if *kind != E::KIND {
                continue;
            }
            let points_at_target = record
                .references()
                .iter()
                .any(|(f, t)| *f == field && *t == target);
            if points_at_target {
                if let Some(entity) = E::from_record(record) {
                    found.insert(key.clone(), entity.clone());
                }
            }
        }

        found.into_values().collect()
    }

    /// Number of distinct records staged.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Consume the change set, returning staged records in first-write order.
    pub fn into_writes(mut self) -> Vec<EntityRecord> {
        self.order
            .iter()
            .filter_map(|id| self.staged.remove(id))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
