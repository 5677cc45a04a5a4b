use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use super::codec::{
    decode_record, encode_record, now_rfc3339, payload_from_row, status_column, validate_record,
};
use super::legacy::import_legacy_queue;
use super::types::{CommitOutcome, KindCounts, PendingRecords, RetiredLocalId, StoreOptions};
use super::SurveyStore;
use crate::error::SurveyError;
use crate::identifiers::RecordId;
use crate::model::{
    EntityKind, GroupRecord, ProjectRecord, SectionRecord, SurveyEntity, SyncStatus, TreeRecord,
};

pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// SQLite-backed [`SurveyStore`]. One table per entity kind keyed by record id, with the
/// parent fk and sync status lifted into indexed columns and the typed record kept as JSON.
pub struct SqliteSurveyStore {
    conn: Mutex<Connection>,
}

impl SqliteSurveyStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SurveyError> {
        Self::open_with_options(path, StoreOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: StoreOptions,
    ) -> Result<Self, SurveyError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(SurveyError::storage)?;
        }

        let conn = Connection::open(path).map_err(SurveyError::storage)?;
        conn.busy_timeout(Duration::from_millis(options.busy_timeout_ms))
            .map_err(SurveyError::storage)?;
        if options.wal_enabled {
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
                .map_err(SurveyError::storage)?;
        }

        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, SurveyError> {
        let conn = Connection::open_in_memory().map_err(SurveyError::storage)?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, SurveyError> {
        bootstrap(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<u32, SurveyError> {
        let conn = self.lock()?;
        current_schema_version(&conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SurveyError> {
        self.conn.lock().map_err(|_| {
            SurveyError::StorageUnavailable("local store connection lock poisoned".to_owned())
        })
    }
}

impl SurveyStore for SqliteSurveyStore {
    fn get<E: SurveyEntity>(&self, id: &RecordId) -> Result<Option<E>, SurveyError> {
        let conn = self.lock()?;
        get_row(&conn, id)
    }

    fn get_all<E: SurveyEntity>(&self) -> Result<Vec<E>, SurveyError> {
        let conn = self.lock()?;
        select_rows(
            &conn,
            &format!(
                "SELECT payload FROM {} ORDER BY rowid ASC",
                E::KIND.collection()
            ),
            [],
        )
    }

    fn get_by_parent<E: SurveyEntity>(&self, parent_id: &RecordId) -> Result<Vec<E>, SurveyError> {
        let conn = self.lock()?;
        select_children(&conn, parent_id)
    }

    fn get_unsynced<E: SurveyEntity>(&self) -> Result<Vec<E>, SurveyError> {
        let conn = self.lock()?;
        select_unsynced(&conn)
    }

    fn put<E: SurveyEntity>(&self, mut record: E) -> Result<E, SurveyError> {
        validate_record(&record)?;
        record.set_modified_at(now_rfc3339()?);
        let conn = self.lock()?;
        upsert_row(&conn, &record)?;
        Ok(record)
    }

    fn put_batch(&self, mut records: PendingRecords) -> Result<PendingRecords, SurveyError> {
        let now = now_rfc3339()?;
        stamp_all(&mut records.projects, &now)?;
        stamp_all(&mut records.sections, &now)?;
        stamp_all(&mut records.groups, &now)?;
        stamp_all(&mut records.trees, &now)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(SurveyError::storage)?;
        upsert_all(&tx, &records.projects)?;
        upsert_all(&tx, &records.sections)?;
        upsert_all(&tx, &records.groups)?;
        upsert_all(&tx, &records.trees)?;
        tx.commit().map_err(SurveyError::storage)?;
        Ok(records)
    }

    fn delete<E: SurveyEntity>(&self, id: &RecordId) -> Result<bool, SurveyError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", E::KIND.collection()),
                params![id.as_str()],
            )
            .map_err(SurveyError::storage)?;
        Ok(deleted > 0)
    }

    fn delete_with_descendants(
        &self,
        kind: EntityKind,
        id: &RecordId,
    ) -> Result<usize, SurveyError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(SurveyError::storage)?;

        let mut removed = 0usize;
        let mut level = Some(kind);
        let mut ids = vec![id.as_str().to_owned()];
        while let Some(current) = level {
            if ids.is_empty() {
                break;
            }

            let mut next = Vec::new();
            if let Some(child) = current.child() {
                for parent in &ids {
                    next.extend(child_ids(&tx, child, parent)?);
                }
            }

            for doomed in &ids {
                removed += tx
                    .execute(
                        &format!("DELETE FROM {} WHERE id = ?1", current.collection()),
                        params![doomed],
                    )
                    .map_err(SurveyError::storage)?;
            }

            ids = next;
            level = current.child();
        }

        tx.commit().map_err(SurveyError::storage)?;
        Ok(removed)
    }

    fn commit_synced<E: SurveyEntity>(
        &self,
        sent_modified_at: Option<&str>,
        mut record: E,
    ) -> Result<CommitOutcome, SurveyError> {
        validate_record(&record)?;
        record.set_sync_status(SyncStatus::Synced);
        record.set_modified_at(now_rfc3339()?);

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(SurveyError::storage)?;
        let (outcome, row) = match reconcile(get_row::<E>(&tx, record.id())?, sent_modified_at) {
            Reconciled::Gone => (CommitOutcome::DeletedLocally, None),
            Reconciled::Edited(local) => (CommitOutcome::KeptLocalEdits, Some(local)),
            Reconciled::Unchanged => (CommitOutcome::Synced, Some(record)),
        };
        if let Some(row) = &row {
            upsert_row(&tx, row)?;
        }
        tx.commit().map_err(SurveyError::storage)?;
        Ok(outcome)
    }

    fn retire_local_id<E: SurveyEntity>(
        &self,
        local_id: &RecordId,
        sent_modified_at: Option<&str>,
        mut record: E,
    ) -> Result<RetiredLocalId, SurveyError> {
        validate_record(&record)?;
        record.set_sync_status(SyncStatus::Synced);
        record.set_modified_at(now_rfc3339()?);

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(SurveyError::storage)?;
        let (outcome, row) = match reconcile(get_row::<E>(&tx, local_id)?, sent_modified_at) {
            Reconciled::Gone => {
                tx.commit().map_err(SurveyError::storage)?;
                return Ok(RetiredLocalId {
                    outcome: CommitOutcome::DeletedLocally,
                    children_rewritten: 0,
                });
            }
            Reconciled::Edited(mut local) => {
                local.set_id(record.id().clone());
                (CommitOutcome::KeptLocalEdits, local)
            }
            Reconciled::Unchanged => (CommitOutcome::Synced, record),
        };

        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", E::KIND.collection()),
            params![local_id.as_str()],
        )
        .map_err(SurveyError::storage)?;
        upsert_row(&tx, &row)?;
        let children_rewritten = match E::KIND.child() {
            Some(child) => reparent_tx(&tx, child, local_id, row.id())?,
            None => 0,
        };
        tx.commit().map_err(SurveyError::storage)?;

        Ok(RetiredLocalId {
            outcome,
            children_rewritten,
        })
    }

    fn pending_snapshot(&self) -> Result<PendingRecords, SurveyError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(SurveyError::storage)?;
        let snapshot = PendingRecords {
            projects: select_unsynced::<ProjectRecord>(&tx)?,
            sections: select_unsynced::<SectionRecord>(&tx)?,
            groups: select_unsynced::<GroupRecord>(&tx)?,
            trees: select_unsynced::<TreeRecord>(&tx)?,
        };
        tx.commit().map_err(SurveyError::storage)?;
        Ok(snapshot)
    }

    fn unsynced_counts(&self) -> Result<KindCounts, SurveyError> {
        let conn = self.lock()?;
        let mut counts = KindCounts::default();
        for kind in EntityKind::HIERARCHY {
            let count: i64 = conn
                .query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE sync_status IN (?1, ?2)",
                        kind.collection()
                    ),
                    params![
                        status_column(SyncStatus::LocalOnly),
                        status_column(SyncStatus::Modified)
                    ],
                    |row| row.get(0),
                )
                .map_err(SurveyError::storage)?;
            let count = usize::try_from(count).map_err(|_| {
                SurveyError::StorageUnavailable(format!(
                    "{kind} count '{count}' cannot be represented as usize"
                ))
            })?;
            counts.set(kind, count);
        }
        Ok(counts)
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>, SurveyError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM sync_metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(SurveyError::storage)
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<(), SurveyError> {
        let now = now_rfc3339()?;
        let conn = self.lock()?;
        set_metadata_row(&conn, key, value, &now)
    }

    fn metadata_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, SurveyError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "
                SELECT key, value
                FROM sync_metadata
                WHERE substr(key, 1, length(?1)) = ?1
                ORDER BY key ASC
                ",
            )
            .map_err(SurveyError::storage)?;
        let rows = stmt
            .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(SurveyError::storage)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(SurveyError::storage)
    }
}

pub(super) fn get_row<E: SurveyEntity>(
    conn: &Connection,
    id: &RecordId,
) -> Result<Option<E>, SurveyError> {
    let payload: Option<String> = conn
        .query_row(
            &format!("SELECT payload FROM {} WHERE id = ?1", E::KIND.collection()),
            params![id.as_str()],
            payload_from_row,
        )
        .optional()
        .map_err(SurveyError::storage)?;
    payload.as_deref().map(decode_record).transpose()
}

pub(super) fn upsert_row<E: SurveyEntity>(conn: &Connection, record: &E) -> Result<(), SurveyError> {
    let payload = encode_record(record)?;
    conn.execute(
        &format!(
            "
            INSERT INTO {} (id, parent_id, sync_status, modified_at, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                parent_id = excluded.parent_id,
                sync_status = excluded.sync_status,
                modified_at = excluded.modified_at,
                payload = excluded.payload
            ",
            E::KIND.collection()
        ),
        params![
            record.id().as_str(),
            record.parent_id().map(RecordId::as_str),
            status_column(record.sync_status()),
            record.modified_at(),
            payload
        ],
    )
    .map_err(SurveyError::storage)?;
    Ok(())
}

pub(super) fn set_metadata_row(
    conn: &Connection,
    key: &str,
    value: &str,
    now: &str,
) -> Result<(), SurveyError> {
    conn.execute(
        "
        INSERT INTO sync_metadata (key, value, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        ",
        params![key, value, now],
    )
    .map_err(SurveyError::storage)?;
    Ok(())
}

fn select_rows<E: SurveyEntity, P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<E>, SurveyError> {
    let mut stmt = conn.prepare(sql).map_err(SurveyError::storage)?;
    let payloads = stmt
        .query_map(params, payload_from_row)
        .map_err(SurveyError::storage)?
        .collect::<Result<Vec<String>, _>>()
        .map_err(SurveyError::storage)?;
    payloads.iter().map(|payload| decode_record(payload)).collect()
}

fn select_children<E: SurveyEntity>(
    conn: &Connection,
    parent_id: &RecordId,
) -> Result<Vec<E>, SurveyError> {
    select_rows(
        conn,
        &format!(
            "SELECT payload FROM {} WHERE parent_id = ?1 ORDER BY rowid ASC",
            E::KIND.collection()
        ),
        params![parent_id.as_str()],
    )
}

fn select_unsynced<E: SurveyEntity>(conn: &Connection) -> Result<Vec<E>, SurveyError> {
    select_rows(
        conn,
        &format!(
            "SELECT payload FROM {} WHERE sync_status IN (?1, ?2) ORDER BY rowid ASC",
            E::KIND.collection()
        ),
        params![
            status_column(SyncStatus::LocalOnly),
            status_column(SyncStatus::Modified)
        ],
    )
}

fn child_ids(conn: &Connection, kind: EntityKind, parent: &str) -> Result<Vec<String>, SurveyError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id FROM {} WHERE parent_id = ?1",
            kind.collection()
        ))
        .map_err(SurveyError::storage)?;
    let rows = stmt
        .query_map(params![parent], |row| row.get(0))
        .map_err(SurveyError::storage)?;
    rows.collect::<Result<Vec<String>, _>>()
        .map_err(SurveyError::storage)
}

enum Reconciled<E> {
    Gone,
    Edited(E),
    Unchanged,
}

/// Compares the row as it is now with the version a request was built from. An edited row
/// comes back tagged `modified` with its own `modified_at`.
fn reconcile<E: SurveyEntity>(current: Option<E>, sent_modified_at: Option<&str>) -> Reconciled<E> {
    match current {
        None => Reconciled::Gone,
        Some(mut local) if local.modified_at() != sent_modified_at => {
            local.set_sync_status(SyncStatus::Modified);
            Reconciled::Edited(local)
        }
        Some(_) => Reconciled::Unchanged,
    }
}

fn stamp_all<E: SurveyEntity>(records: &mut [E], now: &str) -> Result<(), SurveyError> {
    for record in records.iter_mut() {
        validate_record(record)?;
        record.set_modified_at(now.to_owned());
    }
    Ok(())
}

fn upsert_all<E: SurveyEntity>(conn: &Connection, records: &[E]) -> Result<(), SurveyError> {
    records.iter().try_for_each(|record| upsert_row(conn, record))
}

fn reparent_tx(
    tx: &Transaction<'_>,
    child_kind: EntityKind,
    old_parent: &RecordId,
    new_parent: &RecordId,
) -> Result<usize, SurveyError> {
    match child_kind {
        EntityKind::Project => Ok(0),
        EntityKind::Section => reparent_kind::<SectionRecord>(tx, old_parent, new_parent),
        EntityKind::Group => reparent_kind::<GroupRecord>(tx, old_parent, new_parent),
        EntityKind::Tree => reparent_kind::<TreeRecord>(tx, old_parent, new_parent),
    }
}

/// Points children at their parent's new id. `modified_at` is left as it was so a child
/// read before the rewrite still matches its row when its own answer is committed.
fn reparent_kind<C: SurveyEntity>(
    conn: &Connection,
    old_parent: &RecordId,
    new_parent: &RecordId,
) -> Result<usize, SurveyError> {
    let children: Vec<C> = select_children(conn, old_parent)?;
    for mut child in children.iter().cloned() {
        child.set_parent_id(new_parent.clone());
        upsert_row(conn, &child)?;
        debug!(
            kind = %C::KIND,
            id = %child.id(),
            old_parent = %old_parent,
            new_parent = %new_parent,
            "rewrote child parent reference"
        );
    }
    Ok(children.len())
}

fn bootstrap(conn: &mut Connection) -> Result<(), SurveyError> {
    let current = current_schema_version(conn)?;
    if current > CURRENT_SCHEMA_VERSION {
        return Err(SurveyError::UnsupportedSchemaVersion {
            supported: CURRENT_SCHEMA_VERSION,
            found: current,
        });
    }

    apply_pending_migrations(conn, current)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, SurveyError> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .map(|opt| opt.is_some())
    .map_err(SurveyError::storage)
}

pub(super) fn table_exists_tx(tx: &Transaction<'_>, name: &str) -> Result<bool, SurveyError> {
    table_exists(tx, name)
}

fn current_schema_version(conn: &Connection) -> Result<u32, SurveyError> {
    if !table_exists(conn, "schema_migrations")? {
        return Ok(0);
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(SurveyError::storage)
}

fn apply_pending_migrations(conn: &mut Connection, current: u32) -> Result<(), SurveyError> {
    for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
        let tx = conn.transaction().map_err(SurveyError::storage)?;
        apply_migration(&tx, version)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            params![version],
        )
        .map_err(SurveyError::storage)?;
        tx.commit().map_err(SurveyError::storage)?;
        info!(version, "applied local store migration");
    }

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: u32) -> Result<(), SurveyError> {
    match version {
        1 => tx
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );

                CREATE TABLE projects (
                    id TEXT PRIMARY KEY,
                    parent_id TEXT NULL,
                    sync_status TEXT NOT NULL,
                    modified_at TEXT NULL,
                    payload TEXT NOT NULL
                );

                CREATE TABLE sections (
                    id TEXT PRIMARY KEY,
                    parent_id TEXT NULL,
                    sync_status TEXT NOT NULL,
                    modified_at TEXT NULL,
                    payload TEXT NOT NULL
                );

                CREATE TABLE groups (
                    id TEXT PRIMARY KEY,
                    parent_id TEXT NULL,
                    sync_status TEXT NOT NULL,
                    modified_at TEXT NULL,
                    payload TEXT NOT NULL
                );

                CREATE TABLE trees (
                    id TEXT PRIMARY KEY,
                    parent_id TEXT NULL,
                    sync_status TEXT NOT NULL,
                    modified_at TEXT NULL,
                    payload TEXT NOT NULL
                );

                CREATE TABLE sync_metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                ",
            )
            .map_err(SurveyError::storage),
        2 => tx
            .execute_batch(
                "
                CREATE INDEX IF NOT EXISTS idx_sections_parent ON sections(parent_id);
                CREATE INDEX IF NOT EXISTS idx_groups_parent ON groups(parent_id);
                CREATE INDEX IF NOT EXISTS idx_trees_parent ON trees(parent_id);
                CREATE INDEX IF NOT EXISTS idx_projects_sync_status ON projects(sync_status);
                CREATE INDEX IF NOT EXISTS idx_sections_sync_status ON sections(sync_status);
                CREATE INDEX IF NOT EXISTS idx_groups_sync_status ON groups(sync_status);
                CREATE INDEX IF NOT EXISTS idx_trees_sync_status ON trees(sync_status);
                ",
            )
            .map_err(SurveyError::storage),
        3 => import_legacy_queue(tx),
        _ => Err(SurveyError::StorageUnavailable(format!(
            "no migration implementation for version {version}"
        ))),
    }
}
