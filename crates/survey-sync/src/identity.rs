use std::sync::Arc;

use serde::Serialize;
use survey_core::{generate_local_id, EntityKind, RecordId, SurveyError, SurveyStore};
use tracing::debug;

pub const ID_MAPPING_KEY_PREFIX: &str = "id_mapping:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdMapping {
    pub kind: EntityKind,
    pub local_id: RecordId,
    pub server_id: RecordId,
}

/// Mints local ids and keeps the durable local-to-server id mapping in the store's
/// metadata collection, keyed by `(kind, local id)`.
pub struct IdentityManager<S> {
    store: Arc<S>,
}

impl<S> Clone for IdentityManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: SurveyStore> IdentityManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn generate_local_id(&self, kind: EntityKind) -> RecordId {
        generate_local_id(kind)
    }

    pub fn is_local_id(&self, id: &RecordId) -> bool {
        id.is_local()
    }

    /// Records that `local_id` was replaced by `server_id`. Writing the same key again
    /// overwrites the earlier value.
    pub fn record_mapping(
        &self,
        kind: EntityKind,
        local_id: &RecordId,
        server_id: &RecordId,
    ) -> Result<(), SurveyError> {
        if !local_id.is_local() {
            return Err(SurveyError::InvalidRecord(format!(
                "cannot map non-local {kind} id '{local_id}'"
            )));
        }
        if server_id.is_local() {
            return Err(SurveyError::InvalidRecord(format!(
                "{kind} id '{local_id}' cannot be mapped to another local id '{server_id}'"
            )));
        }

        self.store
            .set_metadata(&mapping_key(kind, local_id), server_id.as_str())?;
        debug!(kind = %kind, local_id = %local_id, server_id = %server_id, "recorded id mapping");
        Ok(())
    }

    pub fn mapping(
        &self,
        kind: EntityKind,
        local_id: &RecordId,
    ) -> Result<Option<RecordId>, SurveyError> {
        Ok(self
            .store
            .get_metadata(&mapping_key(kind, local_id))?
            .map(RecordId::from))
    }

    /// Mapped server id for a local id that has one; any other id comes back unchanged.
    pub fn resolve(&self, kind: EntityKind, id: &RecordId) -> Result<RecordId, SurveyError> {
        if !id.is_local() {
            return Ok(id.clone());
        }
        Ok(self.mapping(kind, id)?.unwrap_or_else(|| id.clone()))
    }

    pub fn mappings(&self) -> Result<Vec<IdMapping>, SurveyError> {
        let entries = self.store.metadata_with_prefix(ID_MAPPING_KEY_PREFIX)?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| {
                let rest = key.strip_prefix(ID_MAPPING_KEY_PREFIX)?;
                let (kind, local_id) = rest.split_once(':')?;
                Some(IdMapping {
                    kind: EntityKind::from_collection(kind)?,
                    local_id: RecordId::from(local_id),
                    server_id: RecordId::from(value),
                })
            })
            .collect())
    }
}

fn mapping_key(kind: EntityKind, local_id: &RecordId) -> String {
    format!("{ID_MAPPING_KEY_PREFIX}{kind}:{local_id}")
}

#[cfg(test)]
mod tests {
    use survey_core::SqliteSurveyStore;

    use super::*;

    fn identity() -> IdentityManager<SqliteSurveyStore> {
        IdentityManager::new(Arc::new(
            SqliteSurveyStore::in_memory().expect("in-memory store"),
        ))
    }

    #[test]
    fn resolve_returns_mapped_server_id_for_local_ids() {
        let identity = identity();
        let local = identity.generate_local_id(EntityKind::Group);
        assert!(identity.is_local_id(&local));
        assert_eq!(
            identity.resolve(EntityKind::Group, &local).expect("unmapped"),
            local
        );

        identity
            .record_mapping(EntityKind::Group, &local, &RecordId::from(42))
            .expect("record mapping");
        assert_eq!(
            identity.resolve(EntityKind::Group, &local).expect("mapped"),
            RecordId::from(42)
        );
        assert_eq!(
            identity
                .resolve(EntityKind::Section, &local)
                .expect("other kind"),
            local,
            "mappings are scoped per kind"
        );
        assert_eq!(
            identity
                .resolve(EntityKind::Group, &RecordId::from(7))
                .expect("server id"),
            RecordId::from(7)
        );
    }

    #[test]
    fn recording_twice_keeps_the_last_value() {
        let identity = identity();
        let local = RecordId::from("local_project_1_abc");
        identity
            .record_mapping(EntityKind::Project, &local, &RecordId::from(1))
            .expect("first");
        identity
            .record_mapping(EntityKind::Project, &local, &RecordId::from(2))
            .expect("second");

        assert_eq!(
            identity.mappings().expect("mappings"),
            vec![IdMapping {
                kind: EntityKind::Project,
                local_id: local,
                server_id: RecordId::from(2),
            }]
        );
    }

    #[test]
    fn mapping_requires_local_source_and_server_target() {
        let identity = identity();
        assert!(matches!(
            identity.record_mapping(EntityKind::Tree, &RecordId::from(5), &RecordId::from(6)),
            Err(SurveyError::InvalidRecord(_))
        ));
        assert!(matches!(
            identity.record_mapping(
                EntityKind::Tree,
                &RecordId::from("local_tree_1"),
                &RecordId::from("local_tree_2")
            ),
            Err(SurveyError::InvalidRecord(_))
        ));
    }
}
