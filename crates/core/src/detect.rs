#![forbid(unsafe_code)]

use crate::catalog::EntityKind;
use crate::error::ReconcileError;
use crate::snapshot::NaturalKey;
use std::collections::BTreeMap;

/// A natural key observed on exactly two surrogate ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub natural_key: NaturalKey,
    pub min_id: i64,
    pub max_id: i64,
}

/// Groups `(id, key)` pairs and reports every key held by more than one id.
///
/// Keys seen once are skipped. A key held by three or more ids is refused: keeping
/// only the min/max pair would silently drop the middle row.
pub fn detect_duplicates<'a, I>(
    entity: EntityKind,
    keyed_ids: I,
) -> Result<Vec<DuplicateGroup>, ReconcileError>
where
    I: IntoIterator<Item = (i64, &'a NaturalKey)>,
{
    let mut groups = BTreeMap::<&NaturalKey, Vec<i64>>::new();
    for (id, key) in keyed_ids {
        groups.entry(key).or_default().push(id);
    }

    let mut out = Vec::new();
    for (key, mut ids) in groups {
        if ids.len() < 2 {
            continue;
        }
        ids.sort_unstable();
        ids.dedup();
        if ids.len() > 2 {
            return Err(ReconcileError::AmbiguousNaturalKey {
                entity,
                natural_key: key.to_string(),
                ids,
            });
        }
        if ids.len() == 2 {
            out.push(DuplicateGroup {
                natural_key: key.clone(),
                min_id: ids[0],
                max_id: ids[1],
            });
        }
    }
    Ok(out)
}
