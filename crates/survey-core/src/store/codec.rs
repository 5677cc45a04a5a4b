use rusqlite::Row;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::SurveyError;
use crate::model::{SurveyEntity, SyncStatus};

pub(crate) fn now_rfc3339() -> Result<String, SurveyError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(SurveyError::storage)
}

pub(super) fn encode_record<E: SurveyEntity>(record: &E) -> Result<String, SurveyError> {
    serde_json::to_string(record).map_err(SurveyError::storage)
}

/// Decodes a `payload` column. A row that no longer matches its record type counts as
/// corrupt storage, not as bad input.
pub(super) fn decode_record<E: SurveyEntity>(payload: &str) -> Result<E, SurveyError> {
    serde_json::from_str(payload).map_err(|err| {
        SurveyError::StorageUnavailable(format!(
            "stored {} record cannot be decoded: {err}",
            E::KIND
        ))
    })
}

pub(super) fn payload_from_row(row: &Row<'_>) -> rusqlite::Result<String> {
    row.get(0)
}

pub(super) fn status_column(status: SyncStatus) -> &'static str {
    status.as_str()
}

pub(super) fn validate_record<E: SurveyEntity>(record: &E) -> Result<(), SurveyError> {
    if record.id().as_str().trim().is_empty() {
        return Err(SurveyError::InvalidRecord(format!(
            "{} id must not be empty",
            E::KIND
        )));
    }

    match (E::KIND.parent_field(), record.parent_id()) {
        (Some(field), Some(parent)) if parent.as_str().trim().is_empty() => {
            Err(SurveyError::InvalidRecord(format!(
                "{} '{}' has an empty {field}",
                E::KIND,
                record.id()
            )))
        }
        (Some(field), None) => Err(SurveyError::InvalidRecord(format!(
            "{} '{}' is missing {field}",
            E::KIND,
            record.id()
        ))),
        _ => Ok(()),
    }
}
