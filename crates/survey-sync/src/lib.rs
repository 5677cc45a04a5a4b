//! Offline reconciliation: local edits, id mapping, and the parents-first sync run.

pub mod editor;
pub mod engine;
pub mod identity;
pub mod report;
mod stages;

pub use editor::{ImportDocument, LocalEditor};
pub use engine::{SyncManager, SyncOptions, DEFAULT_REQUEST_TIMEOUT};
pub use identity::{IdMapping, IdentityManager, ID_MAPPING_KEY_PREFIX};
pub use report::{IdRemap, KindOutcome, LocalChange, SyncFailure, SyncReport};
