use async_trait::async_trait;
use serde::Serialize;

use crate::error::SurveyError;
use crate::identifiers::RecordId;
use crate::model::{
    EntityKind, GroupFields, GroupRecord, ProjectFields, ProjectRecord, SectionFields,
    SectionRecord, SurveyEntity, TreeFields, TreeRecord,
};

/// Body of a create or update call. Carries domain fields and the parent fk only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RemoteRequest {
    Project(ProjectFields),
    Section(SectionFields),
    Group(GroupFields),
    Tree(TreeFields),
}

impl RemoteRequest {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Project(_) => EntityKind::Project,
            Self::Section(_) => EntityKind::Section,
            Self::Group(_) => EntityKind::Group,
            Self::Tree(_) => EntityKind::Tree,
        }
    }

    pub fn parent_id(&self) -> Option<&RecordId> {
        match self {
            Self::Project(_) => None,
            Self::Section(fields) => Some(&fields.project_id),
            Self::Group(fields) => Some(&fields.section_id),
            Self::Tree(fields) => Some(&fields.group_id),
        }
    }

    pub fn clear_completed(&mut self) {
        match self {
            Self::Group(fields) => fields.completed = None,
            Self::Tree(fields) => fields.completed = None,
            Self::Project(_) | Self::Section(_) => {}
        }
    }
}

/// Canonical record as stored by the remote service.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteRecord {
    Project(ProjectRecord),
    Section(SectionRecord),
    Group(GroupRecord),
    Tree(TreeRecord),
}

impl RemoteRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Project(_) => EntityKind::Project,
            Self::Section(_) => EntityKind::Section,
            Self::Group(_) => EntityKind::Group,
            Self::Tree(_) => EntityKind::Tree,
        }
    }

    pub fn id(&self) -> &RecordId {
        match self {
            Self::Project(record) => &record.id,
            Self::Section(record) => &record.id,
            Self::Group(record) => &record.id,
            Self::Tree(record) => &record.id,
        }
    }

    /// Record the service must now hold after acknowledging `request` under `id`.
    pub fn from_request(id: RecordId, request: RemoteRequest) -> Self {
        match request {
            RemoteRequest::Project(fields) => {
                Self::Project(ProjectRecord::from_fields(id, fields))
            }
            RemoteRequest::Section(fields) => {
                Self::Section(SectionRecord::from_fields(id, fields))
            }
            RemoteRequest::Group(fields) => Self::Group(GroupRecord::from_fields(id, fields)),
            RemoteRequest::Tree(fields) => Self::Tree(TreeRecord::from_fields(id, fields)),
        }
    }
}

/// Server side of the reconciliation protocol: one collection per entity kind.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn create(&self, request: RemoteRequest) -> Result<RemoteRecord, SurveyError>;
    async fn update(
        &self,
        id: &RecordId,
        request: RemoteRequest,
    ) -> Result<RemoteRecord, SurveyError>;
}

#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self) -> bool;
}
