#![forbid(unsafe_code)]

use crate::catalog::EntityKind;
use crate::snapshot::NaturalKey;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemapEntry {
    pub natural_key: NaturalKey,
    pub canonical_id: i64,
    pub duplicate_id: i64,
}

/// All remap entries of one entity type, indexed by duplicate id.
#[derive(Clone, Debug, Serialize)]
pub struct RemapSet {
    entity: EntityKind,
    entries: Vec<RemapEntry>,
    #[serde(skip)]
    by_duplicate: BTreeMap<i64, i64>,
}

impl RemapSet {
    pub fn new(entity: EntityKind, mut entries: Vec<RemapEntry>) -> Self {
        entries.sort_by_key(|entry| entry.duplicate_id);
        let by_duplicate = entries
            .iter()
            .map(|entry| (entry.duplicate_id, entry.canonical_id))
            .collect();
        Self {
            entity,
            entries,
            by_duplicate,
        }
    }

    pub fn empty(entity: EntityKind) -> Self {
        Self::new(entity, Vec::new())
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn entries(&self) -> &[RemapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_duplicate(&self, id: i64) -> bool {
        self.by_duplicate.contains_key(&id)
    }

    pub fn canonical_of(&self, duplicate_id: i64) -> Option<i64> {
        self.by_duplicate.get(&duplicate_id).copied()
    }

    /// The surviving id for `id`: its canonical if it is a duplicate, itself otherwise.
    pub fn resolve(&self, id: i64) -> i64 {
        self.canonical_of(id).unwrap_or(id)
    }

    pub fn duplicate_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.by_duplicate.keys().copied()
    }
}

/// Remap sets of every entity processed so far in a run, handed explicitly to
/// each downstream mapper.
#[derive(Clone, Debug, Default)]
pub struct RemapLedger {
    sets: BTreeMap<EntityKind, RemapSet>,
}

impl RemapLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, set: RemapSet) {
        self.sets.insert(set.entity(), set);
    }

    pub fn get(&self, entity: EntityKind) -> Option<&RemapSet> {
        self.sets.get(&entity)
    }
}
