#![forbid(unsafe_code)]

use crate::catalog::{Catalog, EntityKind};
use crate::error::ReconcileError;
use std::collections::{BTreeMap, BTreeSet};

/// Entity types linked by "whose remap output does my natural key embed".
#[derive(Clone, Debug)]
pub struct EntityGraph {
    nodes: Vec<EntityKind>,
    upstream: BTreeMap<EntityKind, BTreeSet<EntityKind>>,
}

impl EntityGraph {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let nodes = catalog
            .schemas()
            .iter()
            .map(|schema| schema.kind)
            .collect::<Vec<_>>();
        let upstream = catalog
            .schemas()
            .iter()
            .map(|schema| (schema.kind, schema.upstream().into_iter().collect()))
            .collect();
        Self { nodes, upstream }
    }

    pub fn upstream_of(&self, kind: EntityKind) -> impl Iterator<Item = EntityKind> + '_ {
        self.upstream.get(&kind).into_iter().flatten().copied()
    }

    pub fn downstream_of(&self, kind: EntityKind) -> Vec<EntityKind> {
        self.nodes
            .iter()
            .copied()
            .filter(|node| self.upstream_of(*node).any(|up| up == kind))
            .collect()
    }

    /// Kahn's algorithm; among ready nodes the catalog order wins, so the result
    /// is deterministic. Edges to entities outside the catalog are ignored here and
    /// surface later as unresolved references.
    pub fn topological_order(&self) -> Result<Vec<EntityKind>, ReconcileError> {
        let known = self.nodes.iter().copied().collect::<BTreeSet<_>>();
        let mut pending = self
            .nodes
            .iter()
            .map(|node| {
                let count = self
                    .upstream_of(*node)
                    .filter(|up| known.contains(up))
                    .count();
                (*node, count)
            })
            .collect::<BTreeMap<_, _>>();

        let mut order = Vec::with_capacity(self.nodes.len());
        while order.len() < self.nodes.len() {
            let Some(next) = self
                .nodes
                .iter()
                .copied()
                .find(|node| pending.get(node) == Some(&0))
            else {
                let entities = self
                    .nodes
                    .iter()
                    .copied()
                    .filter(|node| pending.contains_key(node))
                    .collect();
                return Err(ReconcileError::DependencyCycle { entities });
            };

            pending.remove(&next);
            for downstream in self.downstream_of(next) {
                if let Some(count) = pending.get_mut(&downstream) {
                    *count = count.saturating_sub(1);
                }
            }
            order.push(next);
        }
        Ok(order)
    }
}
