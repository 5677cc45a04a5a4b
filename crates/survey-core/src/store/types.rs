use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{EntityKind, GroupRecord, ProjectRecord, SectionRecord, TreeRecord};

pub const LAST_SYNC_AT_KEY: &str = "last_sync_at";
/// Queue rows from the superseded operation-queue schema that could not be imported.
pub const LEGACY_OPERATION_KEY_PREFIX: &str = "legacy_operation:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub busy_timeout_ms: u64,
    pub wal_enabled: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            wal_enabled: true,
        }
    }
}

/// How a server answer was folded into the local row it was sent from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    /// The row still matched what was sent and now holds the server's record.
    Synced,
    /// The row was edited while the request was in flight. The local fields were kept and
    /// the row is `modified`, so the next run sends them.
    KeptLocalEdits,
    /// The row was deleted while the request was in flight. Nothing was written.
    DeletedLocally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetiredLocalId {
    pub outcome: CommitOutcome,
    pub children_rewritten: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PendingRecords {
    pub projects: Vec<ProjectRecord>,
    pub sections: Vec<SectionRecord>,
    pub groups: Vec<GroupRecord>,
    pub trees: Vec<TreeRecord>,
}

impl PendingRecords {
    pub fn len(&self) -> usize {
        self.projects.len() + self.sections.len() + self.groups.len() + self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self) -> KindCounts {
        let mut counts = KindCounts::default();
        counts.set(EntityKind::Project, self.projects.len());
        counts.set(EntityKind::Section, self.sections.len());
        counts.set(EntityKind::Group, self.groups.len());
        counts.set(EntityKind::Tree, self.trees.len());
        counts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts(BTreeMap<EntityKind, usize>);

impl KindCounts {
    pub fn get(&self, kind: EntityKind) -> usize {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn set(&mut self, kind: EntityKind, count: usize) {
        self.0.insert(kind, count);
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }
}
