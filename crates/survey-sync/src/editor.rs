use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use survey_core::{
    EntityKind, GroupRecord, KindCounts, PendingRecords, ProjectRecord, RecordId, SectionRecord,
    SurveyEntity, SurveyError, SurveyStore, SyncStatus, TreeRecord,
};
use tracing::info;

use crate::identity::IdentityManager;

/// Bulk input for [`LocalEditor::import`]. Ids only link records within the document;
/// every imported record gets a fresh local id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportDocument {
    #[serde(default)]
    pub projects: Vec<ProjectRecord>,
    #[serde(default)]
    pub sections: Vec<SectionRecord>,
    #[serde(default)]
    pub groups: Vec<GroupRecord>,
    #[serde(default)]
    pub trees: Vec<TreeRecord>,
}

/// Local mutations made while offline. Everything written here is picked up by the next
/// sync run.
pub struct LocalEditor<S> {
    store: Arc<S>,
    identity: IdentityManager<S>,
}

impl<S: SurveyStore> LocalEditor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            identity: IdentityManager::new(Arc::clone(&store)),
            store,
        }
    }

    /// Stores a new `local_only` record under a fresh local id.
    pub fn create<E: SurveyEntity>(&self, fields: E::Fields) -> Result<E, SurveyError> {
        let mut record = E::from_fields(self.identity.generate_local_id(E::KIND), fields);
        self.attach_to_parent(&mut record)?;
        let stored = self.store.put(record)?;
        info!(kind = %E::KIND, id = %stored.id(), "created local record");
        Ok(stored)
    }

    /// Overwrites an existing record. A record the server has seen becomes `modified`;
    /// one that was never uploaded stays `local_only`.
    pub fn update<E: SurveyEntity>(&self, mut record: E) -> Result<E, SurveyError> {
        let existing: E = self
            .store
            .get(record.id())?
            .ok_or_else(|| SurveyError::NotFound {
                kind: E::KIND,
                id: record.id().to_string(),
            })?;
        if record.parent_id() != existing.parent_id() {
            self.attach_to_parent(&mut record)?;
        }
        record.set_sync_status(existing.sync_status().after_local_edit());
        self.store.put(record)
    }

    /// Removes the record and all of its descendants. Nothing is sent to the server.
    pub fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<usize, SurveyError> {
        let removed = self.store.delete_with_descendants(kind, id)?;
        if removed == 0 {
            return Err(SurveyError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        info!(kind = %kind, id = %id, removed, "deleted local records");
        Ok(removed)
    }

    pub fn mark_tree_completed(&self, id: &RecordId) -> Result<TreeRecord, SurveyError> {
        self.set_tree_completed(id, true)
    }

    pub fn reopen_tree(&self, id: &RecordId) -> Result<TreeRecord, SurveyError> {
        self.set_tree_completed(id, false)
    }

    /// Marks a group completed once every one of its trees is.
    pub fn complete_group(&self, id: &RecordId) -> Result<GroupRecord, SurveyError> {
        let mut group: GroupRecord = self.require(id)?;
        let trees: Vec<TreeRecord> = self.store.get_by_parent(id)?;
        let open = trees.iter().filter(|tree| !tree.completed).count();
        if open > 0 {
            return Err(SurveyError::InvalidRecord(format!(
                "group '{id}' still has {open} of {} trees open",
                trees.len()
            )));
        }

        group.completed = true;
        self.update(group)
    }

    /// Creates every record of `document` as `local_only`, linking children to parents
    /// from the same document or already in the store. The records are written in one
    /// transaction, and only once every parent reference has been satisfied.
    pub fn import(&self, document: ImportDocument) -> Result<KindCounts, SurveyError> {
        let mut assigned: HashMap<(EntityKind, RecordId), RecordId> = HashMap::new();
        let projects = self.prepare_import(document.projects, &mut assigned)?;
        let sections = self.prepare_import(document.sections, &mut assigned)?;
        let groups = self.prepare_import(document.groups, &mut assigned)?;
        let trees = self.prepare_import(document.trees, &mut assigned)?;

        let stored = self.store.put_batch(PendingRecords {
            projects,
            sections,
            groups,
            trees,
        })?;
        let counts = stored.counts();

        info!(imported = counts.total(), "imported local records");
        Ok(counts)
    }

    fn prepare_import<E: SurveyEntity>(
        &self,
        records: Vec<E>,
        assigned: &mut HashMap<(EntityKind, RecordId), RecordId>,
    ) -> Result<Vec<E>, SurveyError> {
        let mut prepared = Vec::with_capacity(records.len());
        for mut record in records {
            let document_id = record.id().clone();
            let local_id = self.identity.generate_local_id(E::KIND);
            if assigned
                .insert((E::KIND, document_id.clone()), local_id.clone())
                .is_some()
            {
                return Err(SurveyError::InvalidRecord(format!(
                    "{} '{document_id}' appears twice in the import document",
                    E::KIND
                )));
            }

            record.set_id(local_id);
            record.set_sync_status(SyncStatus::LocalOnly);
            if let (Some(parent_kind), Some(parent_id)) = (E::KIND.parent(), record.parent_id()) {
                match assigned.get(&(parent_kind, parent_id.clone())) {
                    Some(new_parent) => {
                        let new_parent = new_parent.clone();
                        record.set_parent_id(new_parent);
                    }
                    None => self.attach_to_parent(&mut record)?,
                }
            }
            prepared.push(record);
        }
        Ok(prepared)
    }

    fn set_tree_completed(&self, id: &RecordId, completed: bool) -> Result<TreeRecord, SurveyError> {
        let mut tree: TreeRecord = self.require(id)?;
        tree.completed = completed;
        self.update(tree)
    }

    fn require<E: SurveyEntity>(&self, id: &RecordId) -> Result<E, SurveyError> {
        self.store.get(id)?.ok_or_else(|| SurveyError::NotFound {
            kind: E::KIND,
            id: id.to_string(),
        })
    }

    /// Follows a parent id that has since been replaced by a server id, then checks that
    /// the parent exists.
    fn attach_to_parent<E: SurveyEntity>(&self, record: &mut E) -> Result<(), SurveyError> {
        let (Some(parent_kind), Some(parent_id)) = (E::KIND.parent(), record.parent_id()) else {
            return Ok(());
        };

        let parent_id = self.identity.resolve(parent_kind, parent_id)?;
        let exists = match parent_kind {
            EntityKind::Project => self.store.get::<ProjectRecord>(&parent_id)?.is_some(),
            EntityKind::Section => self.store.get::<SectionRecord>(&parent_id)?.is_some(),
            EntityKind::Group => self.store.get::<GroupRecord>(&parent_id)?.is_some(),
            EntityKind::Tree => false,
        };
        if !exists {
            return Err(SurveyError::NotFound {
                kind: parent_kind,
                id: parent_id.to_string(),
            });
        }

        record.set_parent_id(parent_id);
        Ok(())
    }
}
