#![forbid(unsafe_code)]

//! Static description of the corrupted tables: columns, natural keys and the
//! uniqueness scopes the store enforces on them.

use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Class,
    String,
    Value,
    UniqueContext,
    Link,
    Application,
    AuditEntry,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::String => "string",
            Self::Value => "value",
            Self::UniqueContext => "unique_context",
            Self::Link => "link",
            Self::Application => "application",
            Self::AuditEntry => "audit_entry",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Reference { target: EntityKind, nullable: bool },
}

#[derive(Clone, Copy, Debug)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Text,
        }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Integer,
        }
    }

    pub const fn reference(name: &'static str, target: EntityKind) -> Self {
        Self {
            name,
            kind: ColumnKind::Reference {
                target,
                nullable: false,
            },
        }
    }

    pub const fn optional_reference(name: &'static str, target: EntityKind) -> Self {
        Self {
            name,
            kind: ColumnKind::Reference {
                target,
                nullable: true,
            },
        }
    }

    pub fn target(&self) -> Option<EntityKind> {
        match self.kind {
            ColumnKind::Reference { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn nullable(&self) -> bool {
        matches!(self.kind, ColumnKind::Reference { nullable: true, .. })
    }
}

/// A column set no two rows may share.
#[derive(Clone, Copy, Debug)]
pub struct UniqueScope {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub table: &'static str,
    /// Columns after the `id` primary key, in storage order.
    pub columns: &'static [ColumnDef],
    pub natural_key: UniqueScope,
    /// Whether the store backs `natural_key` with a UNIQUE index. Class and string
    /// rows only carry a lookup index, which is how the duplicates got in.
    pub natural_key_enforced: bool,
    pub extra_scopes: &'static [UniqueScope],
    /// Plain (non-unique) lookup indexes as `(index name, columns)`.
    pub lookup_indexes: &'static [(&'static str, &'static [&'static str])],
}

impl EntitySchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Every column referencing another entity, with its position.
    pub fn references(&self) -> impl Iterator<Item = (usize, &ColumnDef, EntityKind)> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(index, column)| column.target().map(|target| (index, column, target)))
    }

    /// The natural key first, then every additional enforced scope.
    pub fn scopes(&self) -> impl Iterator<Item = &UniqueScope> + '_ {
        std::iter::once(&self.natural_key).chain(self.extra_scopes.iter())
    }

    /// The scopes the store backs with a UNIQUE index.
    pub fn enforced_scopes(&self) -> impl Iterator<Item = &UniqueScope> + '_ {
        let natural = self.natural_key_enforced.then_some(&self.natural_key);
        natural.into_iter().chain(self.extra_scopes.iter())
    }

    pub fn scope_indices(&self, scope: &UniqueScope) -> Vec<usize> {
        scope
            .columns
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect()
    }

    pub fn natural_key_indices(&self) -> Vec<usize> {
        self.scope_indices(&self.natural_key)
    }

    pub fn upstream(&self) -> Vec<EntityKind> {
        let mut out = self
            .references()
            .map(|(_, _, target)| target)
            .collect::<Vec<_>>();
        out.sort();
        out.dedup();
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    schemas: &'static [EntitySchema],
}

impl Catalog {
    pub const fn new(schemas: &'static [EntitySchema]) -> Self {
        Self { schemas }
    }

    pub fn standard() -> Self {
        Self::new(STANDARD_SCHEMAS)
    }

    pub fn schemas(&self) -> &'static [EntitySchema] {
        self.schemas
    }

    pub fn schema(&self, kind: EntityKind) -> Option<&'static EntitySchema> {
        self.schemas.iter().find(|schema| schema.kind == kind)
    }

    /// Every `(referencing schema, column index)` pair pointing at `target`.
    pub fn referrers(
        &self,
        target: EntityKind,
    ) -> impl Iterator<Item = (&'static EntitySchema, usize)> + '_ {
        self.schemas.iter().flat_map(move |schema| {
            schema
                .references()
                .filter(move |(_, _, referenced)| *referenced == target)
                .map(move |(index, _, _)| (schema, index))
        })
    }
}

const STANDARD_SCHEMAS: &[EntitySchema] = &[
    EntitySchema {
        kind: EntityKind::Class,
        table: "class_descriptors",
        columns: &[ColumnDef::text("name"), ColumnDef::integer("name_crc")],
        natural_key: UniqueScope {
            name: "class_descriptors_natural_key",
            columns: &["name", "name_crc"],
        },
        natural_key_enforced: false,
        extra_scopes: &[],
        lookup_indexes: &[("idx_class_descriptors_crc", &["name_crc"])],
    },
    EntitySchema {
        kind: EntityKind::String,
        table: "string_values",
        columns: &[ColumnDef::text("content"), ColumnDef::integer("content_crc")],
        natural_key: UniqueScope {
            name: "string_values_natural_key",
            columns: &["content", "content_crc"],
        },
        natural_key_enforced: false,
        extra_scopes: &[],
        lookup_indexes: &[("idx_string_values_crc", &["content_crc"])],
    },
    EntitySchema {
        kind: EntityKind::Value,
        table: "composite_values",
        columns: &[
            ColumnDef::reference("class_id", EntityKind::Class),
            ColumnDef::reference("string_id", EntityKind::String),
        ],
        natural_key: UniqueScope {
            name: "composite_values_type_payload",
            columns: &["class_id", "string_id"],
        },
        natural_key_enforced: true,
        extra_scopes: &[],
        lookup_indexes: &[("idx_composite_values_string", &["string_id"])],
    },
    EntitySchema {
        kind: EntityKind::UniqueContext,
        table: "unique_contexts",
        columns: &[
            ColumnDef::reference("value1_id", EntityKind::Value),
            ColumnDef::optional_reference("value2_id", EntityKind::Value),
            ColumnDef::optional_reference("value3_id", EntityKind::Value),
            ColumnDef::integer("owner_id"),
        ],
        natural_key: UniqueScope {
            name: "unique_contexts_tuple",
            columns: &["value1_id", "value2_id", "value3_id", "owner_id"],
        },
        natural_key_enforced: true,
        extra_scopes: &[],
        lookup_indexes: &[],
    },
    EntitySchema {
        kind: EntityKind::Link,
        table: "quicklinks",
        columns: &[
            ColumnDef::reference("context_id", EntityKind::UniqueContext),
            ColumnDef::reference("key_id", EntityKind::Value),
            ColumnDef::reference("target_id", EntityKind::Value),
            ColumnDef::integer("position"),
        ],
        natural_key: UniqueScope {
            name: "quicklinks_context_key",
            columns: &["context_id", "key_id"],
        },
        natural_key_enforced: true,
        extra_scopes: &[UniqueScope {
            name: "quicklinks_context_position",
            columns: &["context_id", "position"],
        }],
        lookup_indexes: &[("idx_quicklinks_target", &["target_id"])],
    },
    EntitySchema {
        kind: EntityKind::Application,
        table: "audit_applications",
        columns: &[ColumnDef::reference("descriptor_id", EntityKind::Value)],
        natural_key: UniqueScope {
            name: "audit_applications_descriptor",
            columns: &["descriptor_id"],
        },
        natural_key_enforced: true,
        extra_scopes: &[],
        lookup_indexes: &[],
    },
    EntitySchema {
        kind: EntityKind::AuditEntry,
        table: "audit_entries",
        columns: &[
            ColumnDef::reference("application_id", EntityKind::Application),
            ColumnDef::reference("user_id", EntityKind::Value),
            ColumnDef::optional_reference("context_id", EntityKind::UniqueContext),
            ColumnDef::integer("recorded_at_ms"),
            ColumnDef::text("action"),
        ],
        natural_key: UniqueScope {
            name: "audit_entries_event",
            columns: &["application_id", "user_id", "recorded_at_ms", "action"],
        },
        natural_key_enforced: true,
        extra_scopes: &[],
        lookup_indexes: &[("idx_audit_entries_user", &["user_id"])],
    },
];
