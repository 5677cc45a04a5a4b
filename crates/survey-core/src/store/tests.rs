use rusqlite::OptionalExtension;

use super::legacy::{create_legacy_tables, queue_legacy_operation};
use super::*;
use crate::error::SurveyError;
use crate::model::{EntityKind, GroupRecord, ProjectRecord, SectionRecord, SyncStatus, TreeRecord};
use crate::test_support::TestDir;

fn project(id: &str, name: &str) -> ProjectRecord {
    ProjectRecord {
        id: RecordId::from(id),
        name: name.to_owned(),
        wd_number: Some("WD-100".to_owned()),
        work_type: Some("trim".to_owned()),
        sync_status: SyncStatus::LocalOnly,
        modified_at: None,
        created_at: None,
    }
}

fn section(id: &str, project_id: &str) -> SectionRecord {
    SectionRecord {
        id: RecordId::from(id),
        project_id: RecordId::from(project_id),
        name: format!("section {id}"),
        section_number: Some("3".to_owned()),
        description: None,
        sync_status: SyncStatus::LocalOnly,
        modified_at: None,
        created_at: None,
    }
}

fn group(id: &str, section_id: &str) -> GroupRecord {
    GroupRecord {
        id: RecordId::from(id),
        section_id: RecordId::from(section_id),
        name: format!("group {id}"),
        circuit_number: Some("C-12".to_owned()),
        section_number: None,
        id_number: None,
        address: Some("12 Elm St".to_owned()),
        comments: None,
        brush_amount: Some("2".to_owned()),
        cutting_equipment: vec!["bucket".to_owned()],
        cleanup_equipment: vec![],
        customer_notification: vec!["door hanger".to_owned()],
        completed: false,
        sync_status: SyncStatus::LocalOnly,
        modified_at: None,
        created_at: None,
    }
}

fn tree(id: &str, group_id: &str) -> TreeRecord {
    TreeRecord {
        id: RecordId::from(id),
        group_id: RecordId::from(group_id),
        latitude: 44.9778,
        longitude: -93.265,
        species: Some("oak".to_owned()),
        diameter: Some(14.0),
        tree_type: None,
        action: Some("remove".to_owned()),
        health_condition: None,
        canopy_removal: false,
        notes: None,
        refusal: false,
        refusal_reason: None,
        completed: false,
        sync_status: SyncStatus::LocalOnly,
        modified_at: None,
        created_at: None,
    }
}

fn sqlite_object_exists(conn: &rusqlite::Connection, object_type: &str, name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2",
        rusqlite::params![object_type, name],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .expect("query sqlite_master")
    .is_some()
}

#[test]
fn initialization_creates_collections_indexes_and_version() {
    let dir = TestDir::new("store-init");
    let path = dir.join("survey.db");

    let store = SqliteSurveyStore::open(&path).expect("open store");
    assert_eq!(store.schema_version().expect("schema version"), 3);
    drop(store);

    let conn = rusqlite::Connection::open(&path).expect("open sqlite for inspection");
    for table in [
        "schema_migrations",
        "projects",
        "sections",
        "groups",
        "trees",
        "sync_metadata",
    ] {
        assert!(sqlite_object_exists(&conn, "table", table), "missing table {table}");
    }
    for index in [
        "idx_sections_parent",
        "idx_groups_parent",
        "idx_trees_parent",
        "idx_projects_sync_status",
        "idx_trees_sync_status",
    ] {
        assert!(sqlite_object_exists(&conn, "index", index), "missing index {index}");
    }
}

#[test]
fn put_stamps_modified_at_and_upserts_by_id() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");

    let stored = store.put(project("local_project_1", "Elm")).expect("put");
    assert!(stored.modified_at.is_some());
    assert_eq!(stored.sync_status, SyncStatus::LocalOnly);

    store
        .put(project("local_project_1", "Elm renamed"))
        .expect("overwrite");

    let all: Vec<ProjectRecord> = store.get_all().expect("get all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "Elm renamed");

    let fetched: Option<ProjectRecord> = store
        .get(&RecordId::from("local_project_1"))
        .expect("get");
    assert_eq!(fetched.map(|p| p.name), Some("Elm renamed".to_owned()));
    let missing: Option<ProjectRecord> = store.get(&RecordId::from("nope")).expect("get missing");
    assert!(missing.is_none());
}

#[test]
fn put_rejects_blank_identifiers() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");

    let err = store.put(project(" ", "blank")).expect_err("blank id rejected");
    assert!(matches!(err, SurveyError::InvalidRecord(_)));

    let err = store
        .put(section("local_section_1", ""))
        .expect_err("blank parent rejected");
    assert!(matches!(err, SurveyError::InvalidRecord(_)));
}

#[test]
fn get_by_parent_uses_the_parent_column() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");
    store.put(section("s1", "p1")).expect("put s1");
    store.put(section("s2", "p1")).expect("put s2");
    store.put(section("s3", "p2")).expect("put s3");

    let children: Vec<SectionRecord> = store.get_by_parent(&RecordId::from("p1")).expect("query");
    let ids: Vec<&str> = children.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s2"]);
}

#[test]
fn unsynced_queries_skip_synced_records() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");
    let mut synced = group("41", "7");
    synced.sync_status = SyncStatus::Synced;
    let mut modified = group("42", "7");
    modified.sync_status = SyncStatus::Modified;
    store.put(synced).expect("put synced");
    store.put(modified).expect("put modified");
    store.put(group("local_group_1", "7")).expect("put local");
    store.put(tree("local_tree_1", "42")).expect("put tree");

    let pending: Vec<GroupRecord> = store.get_unsynced().expect("unsynced");
    let ids: Vec<&str> = pending.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec!["42", "local_group_1"]);

    let counts = store.unsynced_counts().expect("counts");
    assert_eq!(counts.get(EntityKind::Group), 2);
    assert_eq!(counts.get(EntityKind::Tree), 1);
    assert_eq!(counts.get(EntityKind::Project), 0);
    assert_eq!(store.unsynced_count().expect("total"), 3);

    let snapshot = store.pending_snapshot().expect("snapshot");
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.counts(), counts);
}

#[test]
fn delete_with_descendants_removes_the_whole_subtree() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");
    store.put(project("p1", "Elm")).expect("p1");
    store.put(section("s1", "p1")).expect("s1");
    store.put(section("s2", "p1")).expect("s2");
    store.put(group("g1", "s1")).expect("g1");
    store.put(group("g-other", "s-other")).expect("g-other");
    store.put(tree("t1", "g1")).expect("t1");
    store.put(tree("t2", "g1")).expect("t2");

    let removed = store
        .delete_with_descendants(EntityKind::Project, &RecordId::from("p1"))
        .expect("cascade delete");
    assert_eq!(removed, 6);

    assert!(store.get_all::<ProjectRecord>().expect("projects").is_empty());
    assert!(store.get_all::<SectionRecord>().expect("sections").is_empty());
    assert!(store.get_all::<TreeRecord>().expect("trees").is_empty());
    let groups: Vec<GroupRecord> = store.get_all().expect("groups");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].id.as_str(), "g-other");

    assert!(!store
        .delete::<ProjectRecord>(&RecordId::from("p1"))
        .expect("delete missing"));
}

#[test]
fn retire_local_id_swaps_the_key_and_rewrites_children() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");
    let sent = store.put(group("local_group_050_ff9", "9")).expect("group");
    let child = store
        .put(tree("local_tree_171_ab12cd3", "local_group_050_ff9"))
        .expect("tree");
    store.put(tree("local_tree_2", "other")).expect("unrelated tree");

    let mut server = group("42", "9");
    server.created_at = Some("2026-10-01T12:00:00Z".to_owned());
    let retired = store
        .retire_local_id(
            &RecordId::from("local_group_050_ff9"),
            sent.modified_at.as_deref(),
            server,
        )
        .expect("retire");
    assert_eq!(retired.outcome, CommitOutcome::Synced);
    assert_eq!(retired.children_rewritten, 1);

    let old: Option<GroupRecord> = store
        .get(&RecordId::from("local_group_050_ff9"))
        .expect("get old");
    assert!(old.is_none());
    let new: GroupRecord = store
        .get(&RecordId::from("42"))
        .expect("get new")
        .expect("server record stored");
    assert_eq!(new.sync_status, SyncStatus::Synced);
    assert_eq!(new.created_at.as_deref(), Some("2026-10-01T12:00:00Z"));

    let moved: Vec<TreeRecord> = store.get_by_parent(&RecordId::from("42")).expect("children");
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].id.as_str(), "local_tree_171_ab12cd3");
    assert_eq!(moved[0].group_id.as_str(), "42");
    assert_eq!(moved[0].sync_status, SyncStatus::LocalOnly);
    assert_eq!(moved[0].modified_at, child.modified_at);
}

#[test]
fn retire_local_id_keeps_fields_edited_after_the_record_was_sent() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");
    let sent = store.put(group("local_group_1", "9")).expect("group");
    store.put(tree("local_tree_1", "local_group_1")).expect("tree");

    std::thread::sleep(std::time::Duration::from_millis(5));
    let mut edited = sent.clone();
    edited.name = "Pole 4471 (rechecked)".to_owned();
    let edited = store.put(edited).expect("edit");

    let mut server = group("42", "9");
    server.name = sent.name.clone();
    let retired = store
        .retire_local_id(
            &RecordId::from("local_group_1"),
            sent.modified_at.as_deref(),
            server,
        )
        .expect("retire");
    assert_eq!(retired.outcome, CommitOutcome::KeptLocalEdits);
    assert_eq!(retired.children_rewritten, 1);

    let kept: GroupRecord = store
        .get(&RecordId::from("42"))
        .expect("get new")
        .expect("row moved to the server id");
    assert_eq!(kept.name, "Pole 4471 (rechecked)");
    assert_eq!(kept.sync_status, SyncStatus::Modified);
    assert_eq!(kept.modified_at, edited.modified_at);
    assert!(store
        .get::<GroupRecord>(&RecordId::from("local_group_1"))
        .expect("get old")
        .is_none());
    assert_eq!(
        store
            .get_by_parent::<TreeRecord>(&RecordId::from("42"))
            .expect("children")
            .len(),
        1
    );

    let pending: Vec<GroupRecord> = store.get_unsynced().expect("unsynced");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id.as_str(), "42");
}

#[test]
fn retire_local_id_does_not_restore_a_deleted_record() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");
    let sent = store.put(project("local_project_1", "Doomed")).expect("project");
    store
        .delete_with_descendants(EntityKind::Project, &RecordId::from("local_project_1"))
        .expect("delete");

    let retired = store
        .retire_local_id(
            &RecordId::from("local_project_1"),
            sent.modified_at.as_deref(),
            project("100", "Doomed"),
        )
        .expect("retire");
    assert_eq!(
        retired,
        RetiredLocalId {
            outcome: CommitOutcome::DeletedLocally,
            children_rewritten: 0,
        }
    );
    assert!(store.get_all::<ProjectRecord>().expect("all").is_empty());
}

#[test]
fn commit_synced_respects_edits_and_deletes_made_after_sending() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");
    let mut seeded = project("7", "Elm v2");
    seeded.sync_status = SyncStatus::Modified;
    let sent = store.put(seeded).expect("seed");

    let outcome = store
        .commit_synced(sent.modified_at.as_deref(), project("7", "Elm v2"))
        .expect("commit unchanged");
    assert_eq!(outcome, CommitOutcome::Synced);
    let synced: ProjectRecord = store
        .get(&RecordId::from("7"))
        .expect("get")
        .expect("present");
    assert_eq!(synced.sync_status, SyncStatus::Synced);

    std::thread::sleep(std::time::Duration::from_millis(5));
    let mut edited = synced.clone();
    edited.name = "Elm v3".to_owned();
    edited.sync_status = SyncStatus::Modified;
    store.put(edited).expect("edit");
    let outcome = store
        .commit_synced(synced.modified_at.as_deref(), project("7", "Elm v2"))
        .expect("commit over edit");
    assert_eq!(outcome, CommitOutcome::KeptLocalEdits);
    let kept: ProjectRecord = store
        .get(&RecordId::from("7"))
        .expect("get")
        .expect("present");
    assert_eq!(kept.name, "Elm v3");
    assert_eq!(kept.sync_status, SyncStatus::Modified);

    store
        .delete::<ProjectRecord>(&RecordId::from("7"))
        .expect("delete");
    let outcome = store
        .commit_synced(kept.modified_at.as_deref(), project("7", "Elm v3"))
        .expect("commit over delete");
    assert_eq!(outcome, CommitOutcome::DeletedLocally);
    assert!(store
        .get::<ProjectRecord>(&RecordId::from("7"))
        .expect("get")
        .is_none());
}

#[test]
fn put_batch_writes_every_kind_or_nothing() {
    let dir = TestDir::new("store-batch");
    let path = dir.join("survey.db");
    let store = SqliteSurveyStore::open(&path).expect("open store");

    let stored = store
        .put_batch(PendingRecords {
            projects: vec![project("local_project_1", "Elm")],
            sections: vec![section("local_section_1", "local_project_1")],
            groups: vec![group("local_group_1", "local_section_1")],
            trees: vec![tree("local_tree_1", "local_group_1")],
        })
        .expect("batch");
    assert_eq!(stored.len(), 4);
    assert!(stored.trees[0].modified_at.is_some());
    assert_eq!(store.unsynced_count().expect("count"), 4);

    let invalid = store.put_batch(PendingRecords {
        projects: vec![project("local_project_2", "Oak")],
        trees: vec![tree("", "local_group_1")],
        ..PendingRecords::default()
    });
    assert!(matches!(invalid, Err(SurveyError::InvalidRecord(_))));
    assert_eq!(store.get_all::<ProjectRecord>().expect("projects").len(), 1);

    let conn = rusqlite::Connection::open(&path).expect("open sqlite for tampering");
    conn.execute_batch("DROP TABLE trees").expect("drop trees");
    drop(conn);
    let failed = store.put_batch(PendingRecords {
        projects: vec![project("local_project_3", "Ash")],
        trees: vec![tree("local_tree_3", "local_group_1")],
        ..PendingRecords::default()
    });
    assert!(matches!(failed, Err(SurveyError::StorageUnavailable(_))));
    let projects: Vec<ProjectRecord> = store.get_all().expect("projects");
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].name, "Elm");
}

#[test]
fn metadata_round_trips_and_filters_by_prefix() {
    let store = SqliteSurveyStore::in_memory().expect("in-memory store");
    assert_eq!(store.last_sync_at().expect("unset"), None);

    store.set_metadata("id_mapping:group:a", "1").expect("set a");
    store.set_metadata("id_mapping:group:b", "2").expect("set b");
    store.set_metadata("id_mapping:group:a", "3").expect("overwrite a");
    store.set_metadata("other", "x").expect("set other");
    store.set_last_sync_at("2026-10-17T08:00:00Z").expect("set last sync");

    assert_eq!(
        store.metadata_with_prefix("id_mapping:").expect("prefix"),
        vec![
            ("id_mapping:group:a".to_owned(), "3".to_owned()),
            ("id_mapping:group:b".to_owned(), "2".to_owned()),
        ]
    );
    assert_eq!(
        store.last_sync_at().expect("last sync"),
        Some("2026-10-17T08:00:00Z".to_owned())
    );
}

#[test]
fn records_survive_reopen_without_rerunning_migrations() {
    let dir = TestDir::new("store-reopen");
    let path = dir.join("survey.db");

    {
        let store = SqliteSurveyStore::open(&path).expect("open store");
        store.put(project("local_project_1", "Elm")).expect("put");
    }

    let store = SqliteSurveyStore::open(&path).expect("reopen store");
    let all: Vec<ProjectRecord> = store.get_all().expect("get all");
    assert_eq!(all.len(), 1);
    drop(store);

    let conn = rusqlite::Connection::open(&path).expect("inspect");
    let applied: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
        .expect("count migrations");
    assert_eq!(applied, 3);
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = TestDir::new("store-future");
    let path = dir.join("survey.db");
    drop(SqliteSurveyStore::open(&path).expect("create store"));

    let conn = rusqlite::Connection::open(&path).expect("open sqlite");
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (99, '2030-01-01T00:00:00Z')",
        [],
    )
    .expect("insert future version");
    drop(conn);

    match SqliteSurveyStore::open(&path) {
        Err(SurveyError::UnsupportedSchemaVersion { supported, found }) => {
            assert_eq!(supported, CURRENT_SCHEMA_VERSION);
            assert_eq!(found, 99);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected newer schema to be rejected"),
    }
}

#[test]
fn corrupt_payload_surfaces_as_storage_unavailable() {
    let dir = TestDir::new("store-corrupt");
    let path = dir.join("survey.db");
    drop(SqliteSurveyStore::open(&path).expect("create store"));

    let conn = rusqlite::Connection::open(&path).expect("open sqlite");
    conn.execute(
        "INSERT INTO projects (id, parent_id, sync_status, modified_at, payload) VALUES ('p1', NULL, 'local_only', NULL, '{\"id\":\"p1\"')",
        [],
    )
    .expect("insert corrupt row");
    drop(conn);

    let store = SqliteSurveyStore::open(&path).expect("reopen");
    let err = store
        .get::<ProjectRecord>(&RecordId::from("p1"))
        .expect_err("corrupt row");
    assert!(matches!(err, SurveyError::StorageUnavailable(_)));
    assert!(matches!(
        store.pending_snapshot(),
        Err(SurveyError::StorageUnavailable(_))
    ));
}

#[test]
fn legacy_operation_queue_is_imported_instead_of_discarded() {
    let dir = TestDir::new("store-legacy");
    let path = dir.join("survey.db");

    let conn = rusqlite::Connection::open(&path).expect("open legacy db");
    create_legacy_tables(&conn).expect("legacy tables");
    queue_legacy_operation(
        &conn,
        "create",
        "section",
        r#"{"id":"tmp-p","project_id":"tmp-p","name":"North"}"#,
        "pending",
    )
    .expect("queue section");
    queue_legacy_operation(
        &conn,
        "create",
        "project",
        r#"{"id":"tmp-p","name":"Elm","wd_number":"WD-1"}"#,
        "pending",
    )
    .expect("queue project");
    queue_legacy_operation(
        &conn,
        "update",
        "trees",
        r#"{"id":7,"group_id":3,"latitude":1.5,"longitude":2.5,"completed":true}"#,
        "pending",
    )
    .expect("queue tree update");
    queue_legacy_operation(&conn, "delete", "group", r#"{"id":9}"#, "pending")
        .expect("queue delete");
    queue_legacy_operation(&conn, "create", "project", "not json", "pending")
        .expect("queue garbage");
    queue_legacy_operation(&conn, "create", "project", r#"{"name":"Done"}"#, "completed")
        .expect("queue completed");
    conn.execute(
        "INSERT INTO offline_cache (key, data, last_updated) VALUES ('projects', ?1, 1)",
        rusqlite::params![r#"[{"id":12,"name":"Cached","created_at":"2026-01-01"}]"#],
    )
    .expect("cache projects");
    drop(conn);

    let store = SqliteSurveyStore::open(&path).expect("migrate legacy store");

    let projects: Vec<ProjectRecord> = store.get_all().expect("projects");
    assert_eq!(projects.len(), 2);
    let imported = projects
        .iter()
        .find(|p| p.name == "Elm")
        .expect("queued project imported");
    assert!(imported.id.is_local());
    assert_eq!(imported.sync_status, SyncStatus::LocalOnly);
    let cached = projects
        .iter()
        .find(|p| p.name == "Cached")
        .expect("cached project imported");
    assert_eq!(cached.id.as_str(), "12");
    assert_eq!(cached.sync_status, SyncStatus::Synced);

    let sections: Vec<SectionRecord> = store.get_all().expect("sections");
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].project_id, imported.id);

    let updated: TreeRecord = store
        .get(&RecordId::from("7"))
        .expect("get tree")
        .expect("tree update imported");
    assert_eq!(updated.sync_status, SyncStatus::Modified);
    assert_eq!(updated.group_id.as_str(), "3");
    assert!(updated.completed);

    let preserved = store
        .metadata_with_prefix(LEGACY_OPERATION_KEY_PREFIX)
        .expect("preserved operations");
    assert_eq!(preserved.len(), 2);
    assert!(preserved
        .iter()
        .any(|(_, value)| value.contains("\"delete\"")));
    assert!(preserved.iter().any(|(_, value)| value.contains("not json")));
    drop(store);

    let conn = rusqlite::Connection::open(&path).expect("inspect");
    assert!(!sqlite_object_exists(&conn, "table", "pending_operations"));
    assert!(!sqlite_object_exists(&conn, "table", "offline_cache"));
}
