//! The committed entity store.
//!
//! [`Store`] keeps one ordered table per [`EntityKind`] plus a reverse
//! reference index (target key -> entities pointing at it). It is only ever
//! mutated through [`Store::commit`], which applies a whole batch of staged
//! writes from a [`ChangeSet`](crate::changeset::ChangeSet) and reports the
//! before/after image of every record so the change journal can record it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::entity::{Entity, EntityKind, EntityRecord};
use crate::primitives::EntityKey;

// ---------------------------------------------------------------------------
// Backref
// ---------------------------------------------------------------------------

/// One entry of the reverse reference index: `kind:key` points at the
/// indexed target through `field`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Backref {
    field: &'static str,
    kind: EntityKind,
    key: EntityKey,
}

// ---------------------------------------------------------------------------
// CommittedWrite
// ---------------------------------------------------------------------------

/// Before and after image of one record written by [`Store::commit`].
#[derive(Debug, Clone)]
pub struct CommittedWrite {
    /// The record's kind.
    pub kind: EntityKind,
    /// The record's key.
    pub key: EntityKey,
    /// The record that was replaced, or `None` if this write created it.
    pub old: Option<EntityRecord>,
    /// The record as stored after the write.
    pub new: EntityRecord,
}

impl CommittedWrite {
    /// Whether this write created the record.
    pub fn is_insert(&self) -> bool {
        self.old.is_none()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Committed entity state.
#[derive(Debug, Default)]
pub struct Store {
    tables: BTreeMap<EntityKind, BTreeMap<EntityKey, EntityRecord>>,
    reverse: HashMap<EntityKey, BTreeSet<Backref>>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // -- reads --------------------------------------------------------------

    /// Load a typed entity by key.
    pub fn get<E: Entity>(&self, key: &EntityKey) -> Option<&E> {
        self.get_record(E::KIND, key).and_then(E::from_record)
    }

    /// Whether an entity of type `E` exists under `key`.
    pub fn contains<E: Entity>(&self, key: &EntityKey) -> bool {
        self.get_record(E::KIND, key).is_some()
    }

    /// Load a type-erased record.
    pub fn get_record(&self, kind: EntityKind, key: &EntityKey) -> Option<&EntityRecord> {
        self.tables.get(&kind).and_then(|table| table.get(key))
    }

    /// All records of one kind, in key order.
    pub fn records_of(&self, kind: EntityKind) -> impl Iterator<Item = &EntityRecord> {
        self.tables.get(&kind).into_iter().flat_map(|t| t.values())
    }

    /// All typed entities of type `E`, in key order.
    pub fn all<E: Entity>(&self) -> impl Iterator<Item = &E> {
        self.records_of(E::KIND).filter_map(E::from_record)
    }

    /// Every record in the store, ordered by kind then key.
    pub fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.tables.values().flat_map(|t| t.values())
    }

    /// Keys of `kind` records whose `field` references `target`, in key order.
    pub fn referencing_keys(
        &self,
        kind: EntityKind,
        field: &str,
        target: &EntityKey,
    ) -> Vec<&EntityKey> {
        match self.reverse.get(target) {
            Some(backrefs) => backrefs
                .iter()
                .filter(|b| b.kind == kind && b.field == field)
                .map(|b| &b.key)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Typed entities of type `E` whose `field` references `target`.
    ///
    /// This is the reverse traversal behind derived fields such as a
    /// proposal's votes or a creature's children.
    pub fn referencing<E: Entity>(&self, field: &str, target: &EntityKey) -> Vec<&E> {
        let mut keys = self.referencing_keys(E::KIND, field, target);
        keys.sort();
        keys.dedup();
        keys.into_iter().filter_map(|k| self.get::<E>(k)).collect()
    }

    /// Number of records of one kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.tables.get(&kind).map_or(0, |t| t.len())
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- writes -------------------------------------------------------------

    /// Apply a batch of writes in order, replacing any record under the same
    /// kind and key.
    ///
    /// Returns the before/after image of every write, in the same order.
    pub fn commit(&mut self, writes: Vec<EntityRecord>) -> Vec<CommittedWrite> {
        let mut committed = Vec::with_capacity(writes.len());
        for record in writes {
            let kind = record.kind();
            let key = record.key().clone();
            let old = self.put(record.clone());
            committed.push(CommittedWrite {
                kind,
                key,
                old,
                new: record,
            });
        }
        if !committed.is_empty() {
            tracing::trace!(writes = committed.len(), "store commit");
        }
        committed
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.tables.clear();
        self.reverse.clear();
    }

    /// Insert or replace a single record, maintaining the reverse index.
    pub(crate) fn put(&mut self, record: EntityRecord) -> Option<EntityRecord> {
        let kind = record.kind();
        let key = record.key().clone();

        for (field, target) in record.references() {
            self.reverse.entry(target.clone()).or_default().insert(Backref {
                field,
                kind,
                key: key.clone(),
            });
        }

        let old = self.tables.entry(kind).or_default().insert(key.clone(), record);

        if let Some(previous) = &old {
            let current: BTreeSet<(&'static str, EntityKey)> = self
                .get_record(kind, &key)
                .map(|r| {
                    r.references()
                        .into_iter()
                        .map(|(f, t)| (f, t.clone()))
                        .collect()
                })
                .unwrap_or_default();
            for (field, target) in previous.references() {
                if current.contains(&(field, target.clone())) {
                    continue;
                }
                if let Some(backrefs) = self.reverse.get_mut(target) {
                    backrefs.remove(&Backref {
                        field,
                        kind,
                        key: key.clone(),
                    });
                    if backrefs.is_empty() {
                        self.reverse.remove(target);
                    }
                }
            }
        }

        old
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Relationship, User};
    use crate::ids::{address_key, relationship_key};
    use crate::primitives::Address;

    fn relationship(user: u64, aminal: u64, love: u128) -> Relationship {
        let u = Address::from_low_u64(user);
        let a = Address::from_low_u64(aminal);
        Relationship {
            id: relationship_key(&u, &a),
            user: address_key(&u),
            aminal: address_key(&a),
            love,
            last_fed_block: 1,
        }
    }

    #[test]
    fn commit_reports_inserts_and_updates() {
        let mut store = Store::new();
        let first = store.commit(vec![relationship(1, 2, 5).into_record()]);
        assert!(first[0].is_insert());

        let second = store.commit(vec![relationship(1, 2, 9).into_record()]);
        assert!(!second[0].is_insert());
        let old = second[0].old.as_ref().unwrap();
        assert_eq!(Relationship::from_record(old).unwrap().love, 5);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn count_and_iteration_are_per_kind() {
        let mut store = Store::new();
        store.commit(vec![
            User::new(Address::from_low_u64(3), 1).into_record(),
            User::new(Address::from_low_u64(1), 1).into_record(),
            relationship(1, 2, 5).into_record(),
        ]);
        assert_eq!(store.count(EntityKind::User), 2);
        assert_eq!(store.count(EntityKind::Relationship), 1);
        assert_eq!(store.count(EntityKind::Aminal), 0);

        let users: Vec<u64> = store
            .all::<User>()
            .map(|u| u.address.0[19] as u64)
            .collect();
        assert_eq!(users, vec![1, 3]);
    }

    #[test]
    fn unchanged_references_survive_rewrite() {
        let mut store = Store::new();
        store.commit(vec![relationship(1, 2, 5).into_record()]);
        store.commit(vec![relationship(1, 2, 6).into_record()]);
        let aminal = address_key(&Address::from_low_u64(2));
        assert_eq!(store.referencing::<Relationship>("aminal", &aminal).len(), 1);
    }

    #[test]
    fn clear_empties_tables_and_index() {
        let mut store = Store::new();
        store.commit(vec![relationship(1, 2, 5).into_record()]);
        store.clear();
        assert!(store.is_empty());
        let aminal = address_key(&Address::from_low_u64(2));
        assert!(store.referencing::<Relationship>("aminal", &aminal).is_empty());
    }
}
