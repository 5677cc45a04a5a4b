use std::collections::BTreeMap;

use serde::Serialize;
use survey_core::{CommitOutcome, EntityKind, RecordId, SurveyError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub kind: EntityKind,
    pub id: RecordId,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdRemap {
    pub kind: EntityKind,
    pub local_id: RecordId,
    pub server_id: RecordId,
    pub children_rewritten: usize,
}

/// A record the server accepted whose local row changed while the request was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalChange {
    pub kind: EntityKind,
    pub id: RecordId,
    pub outcome: CommitOutcome,
}

/// Aggregate result of one `sync_all` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub outcomes: BTreeMap<EntityKind, KindOutcome>,
    pub failures: Vec<SyncFailure>,
    pub remaps: Vec<IdRemap>,
    pub local_changes: Vec<LocalChange>,
    /// Set only when every record in the run succeeded.
    pub last_synced_at: Option<String>,
}

impl SyncReport {
    pub fn new(started_at: String) -> Self {
        Self {
            started_at,
            finished_at: None,
            outcomes: EntityKind::HIERARCHY
                .into_iter()
                .map(|kind| (kind, KindOutcome::default()))
                .collect(),
            failures: Vec::new(),
            remaps: Vec::new(),
            local_changes: Vec::new(),
            last_synced_at: None,
        }
    }

    pub fn outcome(&self, kind: EntityKind) -> KindOutcome {
        self.outcomes.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_succeeded(&self) -> usize {
        self.outcomes.values().map(|outcome| outcome.succeeded).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record_success(&mut self, kind: EntityKind) {
        self.outcomes.entry(kind).or_default().succeeded += 1;
    }

    pub(crate) fn record_remap(&mut self, remap: IdRemap) {
        self.remaps.push(remap);
    }

    pub(crate) fn record_local_change(
        &mut self,
        kind: EntityKind,
        id: RecordId,
        outcome: CommitOutcome,
    ) {
        self.local_changes.push(LocalChange { kind, id, outcome });
    }

    pub(crate) fn record_failure(&mut self, kind: EntityKind, id: RecordId, err: &SurveyError) {
        self.outcomes.entry(kind).or_default().failed += 1;
        self.failures.push(SyncFailure {
            kind,
            id,
            code: err.code().to_owned(),
            reason: err.to_string(),
        });
    }

    pub(crate) fn finish(mut self, finished_at: String, last_synced_at: Option<String>) -> Self {
        self.finished_at = Some(finished_at);
        self.last_synced_at = last_synced_at;
        self
    }
}
