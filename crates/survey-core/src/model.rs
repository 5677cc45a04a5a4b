use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SurveyError;
use crate::identifiers::RecordId;
use crate::remote::{RemoteRecord, RemoteRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Section,
    Group,
    Tree,
}

impl EntityKind {
    /// Parents first; sync runs and migrations walk collections in this order.
    pub const HIERARCHY: [EntityKind; 4] = [
        EntityKind::Project,
        EntityKind::Section,
        EntityKind::Group,
        EntityKind::Tree,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Section => "section",
            Self::Group => "group",
            Self::Tree => "tree",
        }
    }

    /// Plural name shared by the local table and the remote collection resource.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::Section => "sections",
            Self::Group => "groups",
            Self::Tree => "trees",
        }
    }

    pub fn parent(self) -> Option<EntityKind> {
        match self {
            Self::Project => None,
            Self::Section => Some(Self::Project),
            Self::Group => Some(Self::Section),
            Self::Tree => Some(Self::Group),
        }
    }

    pub fn child(self) -> Option<EntityKind> {
        match self {
            Self::Project => Some(Self::Section),
            Self::Section => Some(Self::Group),
            Self::Group => Some(Self::Tree),
            Self::Tree => None,
        }
    }

    pub fn parent_field(self) -> Option<&'static str> {
        match self {
            Self::Project => None,
            Self::Section => Some("project_id"),
            Self::Group => Some("section_id"),
            Self::Tree => Some("group_id"),
        }
    }

    pub fn from_collection(value: &str) -> Option<EntityKind> {
        Self::HIERARCHY
            .into_iter()
            .find(|kind| kind.collection() == value || kind.as_str() == value)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    LocalOnly,
    Modified,
    Synced,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalOnly => "local_only",
            Self::Modified => "modified",
            Self::Synced => "synced",
        }
    }

    pub fn parse(value: &str) -> Option<SyncStatus> {
        match value {
            "local_only" => Some(Self::LocalOnly),
            "modified" => Some(Self::Modified),
            "synced" => Some(Self::Synced),
            _ => None,
        }
    }

    pub fn is_pending(self) -> bool {
        !matches!(self, Self::Synced)
    }

    /// Status after a local edit: a record the server has seen becomes `modified`.
    pub fn after_local_edit(self) -> SyncStatus {
        match self {
            Self::LocalOnly => Self::LocalOnly,
            Self::Modified | Self::Synced => Self::Modified,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectRecord {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub wd_number: Option<String>,
    #[serde(default)]
    pub work_type: Option<String>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionRecord {
    pub id: RecordId,
    pub project_id: RecordId,
    pub name: String,
    #[serde(default)]
    pub section_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupRecord {
    pub id: RecordId,
    pub section_id: RecordId,
    pub name: String,
    #[serde(default)]
    pub circuit_number: Option<String>,
    #[serde(default)]
    pub section_number: Option<String>,
    #[serde(default)]
    pub id_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub brush_amount: Option<String>,
    #[serde(default)]
    pub cutting_equipment: Vec<String>,
    #[serde(default)]
    pub cleanup_equipment: Vec<String>,
    #[serde(default)]
    pub customer_notification: Vec<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeRecord {
    pub id: RecordId,
    pub group_id: RecordId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub diameter: Option<f64>,
    #[serde(default)]
    pub tree_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub health_condition: Option<String>,
    #[serde(default)]
    pub canopy_removal: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub refusal: bool,
    #[serde(default)]
    pub refusal_reason: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Domain fields of a project as submitted to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFields {
    pub name: String,
    #[serde(default)]
    pub wd_number: Option<String>,
    #[serde(default)]
    pub work_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionFields {
    pub project_id: RecordId,
    pub name: String,
    #[serde(default)]
    pub section_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFields {
    pub section_id: RecordId,
    pub name: String,
    #[serde(default)]
    pub circuit_number: Option<String>,
    #[serde(default)]
    pub section_number: Option<String>,
    #[serde(default)]
    pub id_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub brush_amount: Option<String>,
    #[serde(default)]
    pub cutting_equipment: Vec<String>,
    #[serde(default)]
    pub cleanup_equipment: Vec<String>,
    #[serde(default)]
    pub customer_notification: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeFields {
    pub group_id: RecordId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub diameter: Option<f64>,
    #[serde(default)]
    pub tree_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub health_condition: Option<String>,
    #[serde(default)]
    pub canopy_removal: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub refusal: bool,
    #[serde(default)]
    pub refusal_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

/// Shared shape of the four survey collections.
///
/// The store and the sync stages are generic over this trait so every hierarchy level goes
/// through the same code path.
pub trait SurveyEntity:
    Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityKind;
    type Fields: Debug + Clone + Serialize + DeserializeOwned + Send + Sync;

    fn id(&self) -> &RecordId;
    fn set_id(&mut self, id: RecordId);
    fn parent_id(&self) -> Option<&RecordId>;
    /// No-op for projects, which have no parent.
    fn set_parent_id(&mut self, parent_id: RecordId);
    fn sync_status(&self) -> SyncStatus;
    fn set_sync_status(&mut self, status: SyncStatus);
    fn modified_at(&self) -> Option<&str>;
    fn set_modified_at(&mut self, modified_at: String);

    fn fields(&self) -> Self::Fields;
    /// Builds a fresh `local_only` record around `fields`.
    fn from_fields(id: RecordId, fields: Self::Fields) -> Self;

    fn wrap_request(fields: Self::Fields) -> RemoteRequest;
    fn from_remote(record: RemoteRecord) -> Result<Self, SurveyError>;

    /// Request body for this record; creates leave out `completed`.
    fn to_request(&self, include_completed: bool) -> RemoteRequest {
        let mut request = Self::wrap_request(self.fields());
        if !include_completed {
            request.clear_completed();
        }
        request
    }
}

fn kind_mismatch(expected: EntityKind, record: &RemoteRecord) -> SurveyError {
    SurveyError::InvalidRecord(format!(
        "expected a {expected} record from the remote service, got a {}",
        record.kind()
    ))
}

impl SurveyEntity for ProjectRecord {
    const KIND: EntityKind = EntityKind::Project;
    type Fields = ProjectFields;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn parent_id(&self) -> Option<&RecordId> {
        None
    }

    fn set_parent_id(&mut self, _parent_id: RecordId) {}

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    fn set_sync_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
    }

    fn modified_at(&self) -> Option<&str> {
        self.modified_at.as_deref()
    }

    fn set_modified_at(&mut self, modified_at: String) {
        self.modified_at = Some(modified_at);
    }

    fn fields(&self) -> ProjectFields {
        ProjectFields {
            name: self.name.clone(),
            wd_number: self.wd_number.clone(),
            work_type: self.work_type.clone(),
        }
    }

    fn from_fields(id: RecordId, fields: ProjectFields) -> Self {
        Self {
            id,
            name: fields.name,
            wd_number: fields.wd_number,
            work_type: fields.work_type,
            sync_status: SyncStatus::LocalOnly,
            modified_at: None,
            created_at: None,
        }
    }

    fn wrap_request(fields: ProjectFields) -> RemoteRequest {
        RemoteRequest::Project(fields)
    }

    fn from_remote(record: RemoteRecord) -> Result<Self, SurveyError> {
        match record {
            RemoteRecord::Project(project) => Ok(project),
            other => Err(kind_mismatch(Self::KIND, &other)),
        }
    }
}

impl SurveyEntity for SectionRecord {
    const KIND: EntityKind = EntityKind::Section;
    type Fields = SectionFields;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn parent_id(&self) -> Option<&RecordId> {
        Some(&self.project_id)
    }

    fn set_parent_id(&mut self, parent_id: RecordId) {
        self.project_id = parent_id;
    }

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    fn set_sync_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
    }

    fn modified_at(&self) -> Option<&str> {
        self.modified_at.as_deref()
    }

    fn set_modified_at(&mut self, modified_at: String) {
        self.modified_at = Some(modified_at);
    }

    fn fields(&self) -> SectionFields {
        SectionFields {
            project_id: self.project_id.clone(),
            name: self.name.clone(),
            section_number: self.section_number.clone(),
            description: self.description.clone(),
        }
    }

    fn from_fields(id: RecordId, fields: SectionFields) -> Self {
        Self {
            id,
            project_id: fields.project_id,
            name: fields.name,
            section_number: fields.section_number,
            description: fields.description,
            sync_status: SyncStatus::LocalOnly,
            modified_at: None,
            created_at: None,
        }
    }

    fn wrap_request(fields: SectionFields) -> RemoteRequest {
        RemoteRequest::Section(fields)
    }

    fn from_remote(record: RemoteRecord) -> Result<Self, SurveyError> {
        match record {
            RemoteRecord::Section(section) => Ok(section),
            other => Err(kind_mismatch(Self::KIND, &other)),
        }
    }
}

impl SurveyEntity for GroupRecord {
    const KIND: EntityKind = EntityKind::Group;
    type Fields = GroupFields;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn parent_id(&self) -> Option<&RecordId> {
        Some(&self.section_id)
    }

    fn set_parent_id(&mut self, parent_id: RecordId) {
        self.section_id = parent_id;
    }

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    fn set_sync_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
    }

    fn modified_at(&self) -> Option<&str> {
        self.modified_at.as_deref()
    }

    fn set_modified_at(&mut self, modified_at: String) {
        self.modified_at = Some(modified_at);
    }

    fn fields(&self) -> GroupFields {
        GroupFields {
            section_id: self.section_id.clone(),
            name: self.name.clone(),
            circuit_number: self.circuit_number.clone(),
            section_number: self.section_number.clone(),
            id_number: self.id_number.clone(),
            address: self.address.clone(),
            comments: self.comments.clone(),
            brush_amount: self.brush_amount.clone(),
            cutting_equipment: self.cutting_equipment.clone(),
            cleanup_equipment: self.cleanup_equipment.clone(),
            customer_notification: self.customer_notification.clone(),
            completed: Some(self.completed),
        }
    }

    fn from_fields(id: RecordId, fields: GroupFields) -> Self {
        Self {
            id,
            section_id: fields.section_id,
            name: fields.name,
            circuit_number: fields.circuit_number,
            section_number: fields.section_number,
            id_number: fields.id_number,
            address: fields.address,
            comments: fields.comments,
            brush_amount: fields.brush_amount,
            cutting_equipment: fields.cutting_equipment,
            cleanup_equipment: fields.cleanup_equipment,
            customer_notification: fields.customer_notification,
            completed: fields.completed.unwrap_or(false),
            sync_status: SyncStatus::LocalOnly,
            modified_at: None,
            created_at: None,
        }
    }

    fn wrap_request(fields: GroupFields) -> RemoteRequest {
        RemoteRequest::Group(fields)
    }

    fn from_remote(record: RemoteRecord) -> Result<Self, SurveyError> {
        match record {
            RemoteRecord::Group(group) => Ok(group),
            other => Err(kind_mismatch(Self::KIND, &other)),
        }
    }
}

impl SurveyEntity for TreeRecord {
    const KIND: EntityKind = EntityKind::Tree;
    type Fields = TreeFields;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn parent_id(&self) -> Option<&RecordId> {
        Some(&self.group_id)
    }

    fn set_parent_id(&mut self, parent_id: RecordId) {
        self.group_id = parent_id;
    }

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    fn set_sync_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
    }

    fn modified_at(&self) -> Option<&str> {
        self.modified_at.as_deref()
    }

    fn set_modified_at(&mut self, modified_at: String) {
        self.modified_at = Some(modified_at);
    }

    fn fields(&self) -> TreeFields {
        TreeFields {
            group_id: self.group_id.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            species: self.species.clone(),
            diameter: self.diameter,
            tree_type: self.tree_type.clone(),
            action: self.action.clone(),
            health_condition: self.health_condition.clone(),
            canopy_removal: self.canopy_removal,
            notes: self.notes.clone(),
            refusal: self.refusal,
            refusal_reason: self.refusal_reason.clone(),
            completed: Some(self.completed),
        }
    }

    fn from_fields(id: RecordId, fields: TreeFields) -> Self {
        Self {
            id,
            group_id: fields.group_id,
            latitude: fields.latitude,
            longitude: fields.longitude,
            species: fields.species,
            diameter: fields.diameter,
            tree_type: fields.tree_type,
            action: fields.action,
            health_condition: fields.health_condition,
            canopy_removal: fields.canopy_removal,
            notes: fields.notes,
            refusal: fields.refusal,
            refusal_reason: fields.refusal_reason,
            completed: fields.completed.unwrap_or(false),
            sync_status: SyncStatus::LocalOnly,
            modified_at: None,
            created_at: None,
        }
    }

    fn wrap_request(fields: TreeFields) -> RemoteRequest {
        RemoteRequest::Tree(fields)
    }

    fn from_remote(record: RemoteRecord) -> Result<Self, SurveyError> {
        match record {
            RemoteRecord::Tree(tree) => Ok(tree),
            other => Err(kind_mismatch(Self::KIND, &other)),
        }
    }
}
