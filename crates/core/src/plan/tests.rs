use super::*;
use crate::snapshot::EntityRow;

const CRC: i64 = 0x5f3a;

fn class(id: i64, name: &str) -> EntityRow {
    EntityRow::new(id, vec![Cell::from(name), Cell::from(CRC)])
}

fn string(id: i64, content: &str) -> EntityRow {
    EntityRow::new(id, vec![Cell::from(content), Cell::from(CRC + 1)])
}

fn value(id: i64, class_id: i64, string_id: i64) -> EntityRow {
    EntityRow::new(id, vec![Cell::from(class_id), Cell::from(string_id)])
}

fn context(id: i64, v1: i64, v2: Option<i64>, v3: Option<i64>, owner: i64) -> EntityRow {
    EntityRow::new(
        id,
        vec![
            Cell::from(v1),
            Cell::from(v2),
            Cell::from(v3),
            Cell::from(owner),
        ],
    )
}

fn link(id: i64, context_id: i64, key_id: i64, target_id: i64, position: i64) -> EntityRow {
    EntityRow::new(
        id,
        vec![
            Cell::from(context_id),
            Cell::from(key_id),
            Cell::from(target_id),
            Cell::from(position),
        ],
    )
}

fn application(id: i64, descriptor_id: i64) -> EntityRow {
    EntityRow::new(id, vec![Cell::from(descriptor_id)])
}

fn audit(id: i64, app_id: i64, user_id: i64, context_id: Option<i64>, at: i64) -> EntityRow {
    EntityRow::new(
        id,
        vec![
            Cell::from(app_id),
            Cell::from(user_id),
            Cell::from(context_id),
            Cell::from(at),
            Cell::from("login"),
        ],
    )
}

struct Fixture {
    classes: Vec<EntityRow>,
    strings: Vec<EntityRow>,
    values: Vec<EntityRow>,
    contexts: Vec<EntityRow>,
    links: Vec<EntityRow>,
    applications: Vec<EntityRow>,
    audits: Vec<EntityRow>,
}

impl Fixture {
    fn empty() -> Self {
        Self {
            classes: Vec::new(),
            strings: Vec::new(),
            values: Vec::new(),
            contexts: Vec::new(),
            links: Vec::new(),
            applications: Vec::new(),
            audits: Vec::new(),
        }
    }

    fn snapshot(self) -> StoreSnapshot {
        StoreSnapshot::new()
            .with_table(EntityKind::Class, self.classes)
            .with_table(EntityKind::String, self.strings)
            .with_table(EntityKind::Value, self.values)
            .with_table(EntityKind::UniqueContext, self.contexts)
            .with_table(EntityKind::Link, self.links)
            .with_table(EntityKind::Application, self.applications)
            .with_table(EntityKind::AuditEntry, self.audits)
    }
}

/// Class 21 duplicates class 1; value 40 was created against the duplicate.
fn corrupted_chain() -> Fixture {
    let mut fixture = Fixture::empty();
    fixture.classes = vec![class(1, "java.lang.String"), class(21, "java.lang.String")];
    fixture.strings = vec![string(10, "alice"), string(11, "home"), string(12, "jira")];
    fixture.values = vec![
        value(5, 1, 10),
        value(6, 1, 11),
        value(7, 1, 12),
        value(40, 21, 10),
        value(41, 21, 12),
    ];
    fixture.contexts = vec![
        context(3, 5, Some(6), None, 99),
        context(8, 40, Some(6), None, 99),
    ];
    fixture.links = vec![link(100, 8, 6, 40, 0)];
    fixture.applications = vec![application(200, 7), application(201, 41)];
    fixture.audits = vec![
        audit(300, 200, 5, Some(3), 1_000),
        audit(301, 201, 40, Some(8), 1_000),
        audit(302, 201, 40, None, 2_000),
    ];
    fixture
}

#[test]
fn class_duplicate_is_folded_into_the_lower_id() {
    let mut fixture = Fixture::empty();
    fixture.classes = vec![class(1, "java.lang.String"), class(21, "java.lang.String")];
    fixture.strings = vec![string(10, "payload")];
    fixture.values = vec![value(40, 21, 10)];

    let plan = plan_repair(&Catalog::standard(), &fixture.snapshot()).expect("plan");

    let classes = plan.table(EntityKind::Class).expect("class plan");
    assert_eq!(classes.purge_ids(), vec![21]);

    let values = plan.table(EntityKind::Value).expect("value plan");
    assert!(values.remap.is_empty());
    assert_eq!(values.rewrites.len(), 1);
    assert_eq!(values.rewrites[0].row_id, 40);
    assert_eq!(values.rewrites[0].assignments[0].column, "class_id");
    assert_eq!(values.rewrites[0].assignments[0].to, Cell::Integer(1));
}

#[test]
fn corruption_propagates_through_the_whole_chain() {
    let plan = plan_repair(&Catalog::standard(), &corrupted_chain().snapshot()).expect("plan");

    let purged = |kind| plan.table(kind).expect("table plan").purge_ids();
    assert_eq!(purged(EntityKind::Class), vec![21]);
    assert!(purged(EntityKind::String).is_empty());
    assert_eq!(purged(EntityKind::Value), vec![40, 41]);
    assert_eq!(purged(EntityKind::UniqueContext), vec![8]);
    assert!(purged(EntityKind::Link).is_empty());
    assert_eq!(purged(EntityKind::Application), vec![201]);
    assert_eq!(purged(EntityKind::AuditEntry), vec![301]);

    // Context 8 would collide with context 3 once its first pointer is fixed, so it
    // is redirected instead of rewritten.
    let contexts = plan.table(EntityKind::UniqueContext).expect("context plan");
    assert!(contexts.rewrites.is_empty());
    assert_eq!(
        contexts.redirects,
        vec![Redirect {
            duplicate_id: 8,
            canonical_id: 3,
            rewrite_attempted: true,
        }]
    );

    let links = plan.table(EntityKind::Link).expect("link plan");
    let assignments = &links.rewrites[0].assignments;
    let columns = assignments.iter().map(|a| (a.column, a.to.clone())).collect::<Vec<_>>();
    assert_eq!(
        columns,
        vec![
            ("context_id", Cell::Integer(3)),
            ("target_id", Cell::Integer(5)),
        ]
    );

    let audits = plan.table(EntityKind::AuditEntry).expect("audit plan");
    assert_eq!(audits.rewrites.len(), 1);
    assert_eq!(audits.rewrites[0].row_id, 302);
    assert_eq!(plan.duplicates_detected(), 6);
}

#[test]
fn purge_runs_downstream_first() {
    let plan = plan_repair(&Catalog::standard(), &corrupted_chain().snapshot()).expect("plan");
    let order = plan.purge_order().map(|table| table.entity).collect::<Vec<_>>();
    assert_eq!(order.first(), Some(&EntityKind::AuditEntry));
    assert_eq!(order.last(), Some(&EntityKind::Class));
}

#[test]
fn clean_snapshot_plans_nothing() {
    let mut fixture = Fixture::empty();
    fixture.classes = vec![class(1, "java.lang.String"), class(2, "java.lang.Integer")];
    fixture.strings = vec![string(10, "a")];
    fixture.values = vec![value(5, 1, 10), value(6, 2, 10)];

    let plan = plan_repair(&Catalog::standard(), &fixture.snapshot()).expect("plan");
    assert!(plan.is_noop());
    assert_eq!(plan.duplicates_detected(), 0);
}

#[test]
fn three_way_value_collision_aborts_planning() {
    let mut fixture = Fixture::empty();
    fixture.classes = vec![
        class(1, "java.lang.String"),
        class(21, "java.lang.String"),
        class(2, "java.lang.Integer"),
    ];
    fixture.strings = vec![string(10, "a"), string(30, "a")];
    // After both remaps these three rows all become (1, 10).
    fixture.values = vec![value(5, 1, 10), value(40, 21, 10), value(41, 1, 30)];

    let err = plan_repair(&Catalog::standard(), &fixture.snapshot()).expect_err("ambiguous");
    assert!(matches!(
        err,
        ReconcileError::AmbiguousNaturalKey {
            entity: EntityKind::Value,
            ref ids,
            ..
        } if ids == &vec![5, 40, 41]
    ));
}

#[test]
fn plan_serializes_verdict_details() {
    let plan = plan_repair(&Catalog::standard(), &corrupted_chain().snapshot()).expect("plan");
    let json = serde_json::to_value(&plan).expect("serialize plan");
    let contexts = json["tables"]
        .as_array()
        .expect("tables")
        .iter()
        .find(|table| table["entity"] == "unique_context")
        .expect("context table");
    assert_eq!(contexts["redirects"][0]["canonical_id"], 3);
    assert_eq!(contexts["remap"]["entries"][0]["duplicate_id"], 8);
}

#[test]
fn surviving_reference_to_a_purged_row_is_rejected() {
    let snapshot = corrupted_chain().snapshot();
    let mut plan = plan_repair(&Catalog::standard(), &snapshot).expect("plan");

    // Drop the link rewrite: the link would keep pointing at purged context 8.
    if let Some(links) = plan.tables.iter_mut().find(|t| t.entity == EntityKind::Link) {
        links.rewrites.clear();
    }
    let err = check_purge_safety(&Catalog::standard(), &snapshot, &plan).expect_err("dangling");
    assert_eq!(
        err,
        ReconcileError::ReferentialIntegrityViolation {
            table: "quicklinks",
            column: "context_id",
            row_id: 100,
            target: EntityKind::UniqueContext,
            target_id: 8,
        }
    );
}
