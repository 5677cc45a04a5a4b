mod codec;
mod legacy;
mod sqlite_impl;
mod types;

#[cfg(test)]
mod tests;

pub use sqlite_impl::{SqliteSurveyStore, CURRENT_SCHEMA_VERSION};
pub use types::{
    CommitOutcome, KindCounts, PendingRecords, RetiredLocalId, StoreOptions, LAST_SYNC_AT_KEY,
    LEGACY_OPERATION_KEY_PREFIX,
};

use crate::error::SurveyError;
use crate::identifiers::RecordId;
use crate::model::{EntityKind, SurveyEntity};

/// Durable, per-kind record collections plus a key/value metadata collection.
///
/// Every method runs in its own transaction; a failure leaves the collection as it was.
/// Any inaccessible or corrupt backing storage surfaces as
/// [`SurveyError::StorageUnavailable`].
pub trait SurveyStore: Send + Sync {
    fn get<E: SurveyEntity>(&self, id: &RecordId) -> Result<Option<E>, SurveyError>;
    fn get_all<E: SurveyEntity>(&self) -> Result<Vec<E>, SurveyError>;
    fn get_by_parent<E: SurveyEntity>(&self, parent_id: &RecordId) -> Result<Vec<E>, SurveyError>;
    /// Records whose status is `local_only` or `modified`.
    fn get_unsynced<E: SurveyEntity>(&self) -> Result<Vec<E>, SurveyError>;

    /// Upserts by id and stamps `modified_at`; returns the record as stored.
    fn put<E: SurveyEntity>(&self, record: E) -> Result<E, SurveyError>;
    /// Validates and upserts every record of every kind in one transaction, parents first.
    /// Either all of them are stored or none are.
    fn put_batch(&self, records: PendingRecords) -> Result<PendingRecords, SurveyError>;
    fn delete<E: SurveyEntity>(&self, id: &RecordId) -> Result<bool, SurveyError>;
    /// Deletes a record and everything below it in the hierarchy. Returns rows removed.
    fn delete_with_descendants(&self, kind: EntityKind, id: &RecordId)
        -> Result<usize, SurveyError>;

    /// Stores the server's answer for an already-synced id (tagged `synced`), provided the
    /// row still carries `sent_modified_at`. A row edited since it was read keeps its local
    /// fields as `modified`; a deleted row stays deleted.
    fn commit_synced<E: SurveyEntity>(
        &self,
        sent_modified_at: Option<&str>,
        record: E,
    ) -> Result<CommitOutcome, SurveyError>;
    /// Replaces the local-keyed record with the server's record (tagged `synced`) and points
    /// every child of the old id at the new one, atomically. A row edited since
    /// `sent_modified_at` keeps its local fields under the new id as `modified`; a deleted
    /// row is not brought back.
    fn retire_local_id<E: SurveyEntity>(
        &self,
        local_id: &RecordId,
        sent_modified_at: Option<&str>,
        record: E,
    ) -> Result<RetiredLocalId, SurveyError>;

    /// Every unsynced record of every kind, read in one transaction.
    fn pending_snapshot(&self) -> Result<PendingRecords, SurveyError>;
    fn unsynced_counts(&self) -> Result<KindCounts, SurveyError>;

    fn get_metadata(&self, key: &str) -> Result<Option<String>, SurveyError>;
    fn set_metadata(&self, key: &str, value: &str) -> Result<(), SurveyError>;
    fn metadata_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, SurveyError>;

    fn unsynced_count(&self) -> Result<usize, SurveyError> {
        Ok(self.unsynced_counts()?.total())
    }

    fn last_sync_at(&self) -> Result<Option<String>, SurveyError> {
        self.get_metadata(LAST_SYNC_AT_KEY)
    }

    fn set_last_sync_at(&self, timestamp: &str) -> Result<(), SurveyError> {
        self.set_metadata(LAST_SYNC_AT_KEY, timestamp)
    }
}
