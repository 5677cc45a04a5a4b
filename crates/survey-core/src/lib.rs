pub mod error;
pub mod identifiers;
pub mod model;
pub mod remote;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::SurveyError;
pub use identifiers::{generate_local_id, is_local_id, RecordId, LOCAL_ID_PREFIX};
pub use model::{
    EntityKind, GroupFields, GroupRecord, ProjectFields, ProjectRecord, SectionFields,
    SectionRecord, SurveyEntity, SyncStatus, TreeFields, TreeRecord,
};
pub use remote::{Reachability, RemoteRecord, RemoteRequest, RemoteService};
pub use store::{
    CommitOutcome, KindCounts, PendingRecords, RetiredLocalId, SqliteSurveyStore, StoreOptions,
    SurveyStore, CURRENT_SCHEMA_VERSION, LAST_SYNC_AT_KEY, LEGACY_OPERATION_KEY_PREFIX,
};
