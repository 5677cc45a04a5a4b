//! Import of the operation-queue schema that predates per-kind collections.
//!
//! Devices upgraded from that schema may still hold offline work in `pending_operations`
//! (one row per queued create/update/delete) and server data in `offline_cache`. Queued
//! creates and updates become collection records; anything that cannot be replayed is kept
//! verbatim under a `legacy_operation:<n>` metadata key.

use std::collections::HashMap;

use rusqlite::Transaction;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::codec::now_rfc3339;
use super::sqlite_impl::{get_row, set_metadata_row, table_exists_tx, upsert_row};
use super::types::LEGACY_OPERATION_KEY_PREFIX;
use crate::error::SurveyError;
use crate::identifiers::{generate_local_id, RecordId};
use crate::model::{
    EntityKind, GroupRecord, ProjectRecord, SectionRecord, SurveyEntity, SyncStatus, TreeRecord,
};

#[derive(Debug, Clone)]
struct LegacyOperation {
    id: i64,
    op_type: Option<String>,
    entity: Option<String>,
    data: Option<String>,
    timestamp: Option<i64>,
    status: Option<String>,
}

impl LegacyOperation {
    fn kind(&self) -> Option<EntityKind> {
        self.entity.as_deref().and_then(EntityKind::from_collection)
    }

    fn hierarchy_rank(&self) -> usize {
        self.kind()
            .and_then(|kind| EntityKind::HIERARCHY.iter().position(|k| *k == kind))
            .unwrap_or(EntityKind::HIERARCHY.len())
    }
}

enum Outcome {
    Imported,
    Unsupported(String),
}

/// Queue ids from the old schema, keyed by kind, mapped to the local ids minted for them.
type Remapped = HashMap<(EntityKind, String), RecordId>;

#[derive(Debug, Default)]
struct ImportTally {
    imported: usize,
    preserved: usize,
    skipped: usize,
}

pub(super) fn import_legacy_queue(tx: &Transaction<'_>) -> Result<(), SurveyError> {
    let now = now_rfc3339()?;

    if table_exists_tx(tx, "pending_operations")? {
        let mut operations = read_operations(tx)?;
        operations.sort_by_key(|op| (op.hierarchy_rank(), op.id));

        let mut remapped = Remapped::new();
        let mut tally = ImportTally::default();
        for operation in &operations {
            if operation.status.as_deref() != Some("pending") {
                tally.skipped += 1;
                continue;
            }

            match import_operation(tx, operation, &mut remapped, &now)? {
                Outcome::Imported => tally.imported += 1,
                Outcome::Unsupported(reason) => {
                    warn!(
                        operation_id = operation.id,
                        reason = %reason,
                        "preserving legacy queue operation that cannot be imported"
                    );
                    preserve_operation(tx, operation, &reason, &now)?;
                    tally.preserved += 1;
                }
            }
        }

        tx.execute_batch("DROP TABLE pending_operations;")
            .map_err(SurveyError::storage)?;
        info!(
            imported = tally.imported,
            preserved = tally.preserved,
            skipped = tally.skipped,
            "imported legacy operation queue"
        );
    }

    if table_exists_tx(tx, "offline_cache")? {
        let cached = import_offline_cache(tx, &now)?;
        tx.execute_batch("DROP TABLE offline_cache;")
            .map_err(SurveyError::storage)?;
        info!(cached, "imported legacy offline cache");
    }

    Ok(())
}

fn read_operations(tx: &Transaction<'_>) -> Result<Vec<LegacyOperation>, SurveyError> {
    let mut stmt = tx
        .prepare(
            "
            SELECT id, type, entity, data, timestamp, status
            FROM pending_operations
            ORDER BY id ASC
            ",
        )
        .map_err(SurveyError::storage)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(LegacyOperation {
                id: row.get(0)?,
                op_type: row.get(1)?,
                entity: row.get(2)?,
                data: row.get(3)?,
                timestamp: row.get(4)?,
                status: row.get(5)?,
            })
        })
        .map_err(SurveyError::storage)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(SurveyError::storage)
}

fn import_operation(
    tx: &Transaction<'_>,
    operation: &LegacyOperation,
    remapped: &mut Remapped,
    now: &str,
) -> Result<Outcome, SurveyError> {
    let Some(kind) = operation.kind() else {
        return Ok(Outcome::Unsupported(format!(
            "unknown entity {:?}",
            operation.entity
        )));
    };
    let data = match operation.data.as_deref().map(serde_json::from_str::<Value>) {
        Some(Ok(data)) => data,
        Some(Err(err)) => return Ok(Outcome::Unsupported(format!("data is not JSON: {err}"))),
        None => return Ok(Outcome::Unsupported("operation has no data".to_owned())),
    };

    match (operation.op_type.as_deref(), kind) {
        (Some("create"), EntityKind::Project) => {
            import_create::<ProjectRecord>(tx, data, remapped, now)
        }
        (Some("create"), EntityKind::Section) => {
            import_create::<SectionRecord>(tx, data, remapped, now)
        }
        (Some("create"), EntityKind::Group) => import_create::<GroupRecord>(tx, data, remapped, now),
        (Some("create"), EntityKind::Tree) => import_create::<TreeRecord>(tx, data, remapped, now),
        (Some("update"), EntityKind::Project) => {
            import_update::<ProjectRecord>(tx, data, remapped, now)
        }
        (Some("update"), EntityKind::Section) => {
            import_update::<SectionRecord>(tx, data, remapped, now)
        }
        (Some("update"), EntityKind::Group) => import_update::<GroupRecord>(tx, data, remapped, now),
        (Some("update"), EntityKind::Tree) => import_update::<TreeRecord>(tx, data, remapped, now),
        (other, _) => Ok(Outcome::Unsupported(format!(
            "{other:?} operations are not replayed"
        ))),
    }
}

fn import_create<E: SurveyEntity>(
    tx: &Transaction<'_>,
    data: Value,
    remapped: &mut Remapped,
    now: &str,
) -> Result<Outcome, SurveyError> {
    let legacy_id = data.get("id").and_then(id_from_value);
    let fields: E::Fields = match serde_json::from_value(data) {
        Ok(fields) => fields,
        Err(err) => return Ok(Outcome::Unsupported(format!("invalid {} fields: {err}", E::KIND))),
    };

    let local_id = generate_local_id(E::KIND);
    let mut record = E::from_fields(local_id.clone(), fields);
    remap_parent(&mut record, remapped);
    record.set_modified_at(now.to_owned());
    upsert_row(tx, &record)?;

    if let Some(legacy_id) = legacy_id {
        remapped.insert((E::KIND, legacy_id), local_id);
    }
    Ok(Outcome::Imported)
}

fn import_update<E: SurveyEntity>(
    tx: &Transaction<'_>,
    data: Value,
    remapped: &mut Remapped,
    now: &str,
) -> Result<Outcome, SurveyError> {
    let Some(id) = data.get("id").and_then(id_from_value) else {
        return Ok(Outcome::Unsupported("update without an id".to_owned()));
    };
    let fields: E::Fields = match serde_json::from_value(data) {
        Ok(fields) => fields,
        Err(err) => return Ok(Outcome::Unsupported(format!("invalid {} fields: {err}", E::KIND))),
    };

    // An update to a record created by an earlier queued create stays a local create.
    let (target, status) = match remapped.get(&(E::KIND, id.clone())) {
        Some(local_id) => (local_id.clone(), SyncStatus::LocalOnly),
        None => (RecordId::new(id), SyncStatus::Modified),
    };
    let mut record = E::from_fields(target, fields);
    remap_parent(&mut record, remapped);
    record.set_sync_status(status);
    record.set_modified_at(now.to_owned());
    upsert_row(tx, &record)?;
    Ok(Outcome::Imported)
}

fn remap_parent<E: SurveyEntity>(record: &mut E, remapped: &Remapped) {
    let (Some(parent_kind), Some(parent_id)) = (E::KIND.parent(), record.parent_id()) else {
        return;
    };
    if let Some(mapped) = remapped.get(&(parent_kind, parent_id.as_str().to_owned())) {
        record.set_parent_id(mapped.clone());
    }
}

fn preserve_operation(
    tx: &Transaction<'_>,
    operation: &LegacyOperation,
    reason: &str,
    now: &str,
) -> Result<(), SurveyError> {
    let data = operation
        .data
        .as_deref()
        .map(|raw| serde_json::from_str::<Value>(raw).unwrap_or_else(|_| json!(raw)));
    let preserved = json!({
        "type": operation.op_type,
        "entity": operation.entity,
        "data": data,
        "timestamp": operation.timestamp,
        "status": operation.status,
        "reason": reason,
    });
    set_metadata_row(
        tx,
        &format!("{LEGACY_OPERATION_KEY_PREFIX}{}", operation.id),
        &preserved.to_string(),
        now,
    )
}

fn import_offline_cache(tx: &Transaction<'_>, now: &str) -> Result<usize, SurveyError> {
    let mut stmt = tx
        .prepare("SELECT key, data FROM offline_cache ORDER BY key ASC")
        .map_err(SurveyError::storage)?;
    let entries = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .map_err(SurveyError::storage)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(SurveyError::storage)?;
    drop(stmt);

    let mut cached = 0;
    for kind in EntityKind::HIERARCHY {
        for (key, data) in &entries {
            if EntityKind::from_collection(key) != Some(kind) {
                continue;
            }
            let items = match data.as_deref().map(serde_json::from_str::<Vec<Value>>) {
                Some(Ok(items)) => items,
                _ => {
                    warn!(key = %key, "skipping undecodable legacy cache entry");
                    continue;
                }
            };
            cached += match kind {
                EntityKind::Project => import_cached::<ProjectRecord>(tx, items, now)?,
                EntityKind::Section => import_cached::<SectionRecord>(tx, items, now)?,
                EntityKind::Group => import_cached::<GroupRecord>(tx, items, now)?,
                EntityKind::Tree => import_cached::<TreeRecord>(tx, items, now)?,
            };
        }
    }
    Ok(cached)
}

/// Cached rows are server state: they land as `synced` and never overwrite queued work.
fn import_cached<E: SurveyEntity>(
    tx: &Transaction<'_>,
    items: Vec<Value>,
    now: &str,
) -> Result<usize, SurveyError> {
    let mut imported = 0;
    for item in items {
        let Some(id) = item.get("id").and_then(id_from_value).map(RecordId::new) else {
            continue;
        };
        if id.is_local() || get_row::<E>(tx, &id)?.is_some() {
            continue;
        }
        let Ok(fields) = serde_json::from_value::<E::Fields>(item) else {
            warn!(kind = %E::KIND, id = %id, "skipping undecodable legacy cache row");
            continue;
        };
        let mut record = E::from_fields(id, fields);
        record.set_sync_status(SyncStatus::Synced);
        record.set_modified_at(now.to_owned());
        upsert_row(tx, &record)?;
        imported += 1;
    }
    Ok(imported)
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(super) fn create_legacy_tables(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE pending_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            entity TEXT NOT NULL,
            data TEXT,
            timestamp INTEGER NOT NULL,
            status TEXT NOT NULL
        );
        CREATE INDEX idx_pending_operations_entity ON pending_operations(entity);

        CREATE TABLE offline_cache (
            key TEXT PRIMARY KEY,
            data TEXT,
            last_updated INTEGER NOT NULL
        );
        ",
    )
}

#[cfg(test)]
pub(super) fn queue_legacy_operation(
    conn: &rusqlite::Connection,
    op_type: &str,
    entity: &str,
    data: &str,
    status: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO pending_operations (type, entity, data, timestamp, status) VALUES (?1, ?2, ?3, 1700000000000, ?4)",
        rusqlite::params![op_type, entity, data, status],
    )?;
    Ok(())
}
