#![forbid(unsafe_code)]

use crate::catalog::EntityKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// One stored column value. References are plain integers; NULL only appears in
/// nullable reference columns.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Integer(i64),
    Text(String),
}

impl Cell {
    pub fn as_id(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Option<i64>> for Cell {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Integer)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRow {
    pub id: i64,
    pub cells: Vec<Cell>,
}

impl EntityRow {
    pub fn new(id: i64, cells: Vec<Cell>) -> Self {
        Self { id, cells }
    }

    pub fn project(&self, indices: &[usize]) -> Vec<Cell> {
        indices
            .iter()
            .map(|index| self.cells.get(*index).cloned().unwrap_or(Cell::Null))
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    rows: Vec<EntityRow>,
}

impl TableSnapshot {
    pub fn new(mut rows: Vec<EntityRow>) -> Self {
        rows.sort_by_key(|row| row.id);
        Self { rows }
    }

    pub fn rows(&self) -> &[EntityRow] {
        &self.rows
    }

    pub fn row(&self, id: i64) -> Option<&EntityRow> {
        self.rows
            .binary_search_by_key(&id, |row| row.id)
            .ok()
            .map(|index| &self.rows[index])
    }

    pub fn contains(&self, id: i64) -> bool {
        self.row(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Immutable picture of every corrupted table, read once at the start of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    tables: BTreeMap<EntityKind, TableSnapshot>,
}

impl StoreSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, kind: EntityKind, rows: Vec<EntityRow>) -> Self {
        self.insert(kind, TableSnapshot::new(rows));
        self
    }

    pub fn insert(&mut self, kind: EntityKind, table: TableSnapshot) {
        self.tables.insert(kind, table);
    }

    pub fn table(&self, kind: EntityKind) -> Option<&TableSnapshot> {
        self.tables.get(&kind)
    }

    pub fn contains(&self, kind: EntityKind, id: i64) -> bool {
        self.table(kind).is_some_and(|table| table.contains(id))
    }
}

/// A natural-key (or scope) tuple, kept as cells so NULL compares equal to NULL.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NaturalKey(Vec<Cell>);

impl NaturalKey {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self(cells)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (index, cell) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{cell}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_works_on_unsorted_input() {
        let table = TableSnapshot::new(vec![
            EntityRow::new(21, vec![Cell::from("b")]),
            EntityRow::new(1, vec![Cell::from("a")]),
        ]);
        assert_eq!(table.rows()[0].id, 1);
        assert!(table.contains(21));
        assert!(!table.contains(2));
    }

    #[test]
    fn natural_key_display_quotes_text_and_marks_null() {
        let key = NaturalKey::new(vec![
            Cell::from("java.lang.String"),
            Cell::Null,
            Cell::from(7_i64),
        ]);
        assert_eq!(key.to_string(), "(\"java.lang.String\", NULL, 7)");
    }
}
