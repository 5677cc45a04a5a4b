use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use survey_core::{PendingRecords, Reachability, RemoteService, SurveyError, SurveyStore};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

use crate::identity::IdentityManager;
use crate::report::SyncReport;
use crate::stages::{LevelStage, StageContext};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Upper bound on each create/update call.
    pub request_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Uploads unsynced records parents-first and folds server ids back into the local store.
pub struct SyncManager<S> {
    store: Arc<S>,
    identity: IdentityManager<S>,
    remote: Arc<dyn RemoteService>,
    reachability: Arc<dyn Reachability>,
    options: SyncOptions,
    running: AtomicBool,
}

impl<S: SurveyStore> SyncManager<S> {
    pub fn new(
        store: Arc<S>,
        remote: Arc<dyn RemoteService>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        Self::with_options(store, remote, reachability, SyncOptions::default())
    }

    pub fn with_options(
        store: Arc<S>,
        remote: Arc<dyn RemoteService>,
        reachability: Arc<dyn Reachability>,
        options: SyncOptions,
    ) -> Self {
        Self {
            identity: IdentityManager::new(Arc::clone(&store)),
            store,
            remote,
            reachability,
            options,
            running: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &IdentityManager<S> {
        &self.identity
    }

    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs one reconciliation pass.
    ///
    /// Fails without touching the network when a run is already in flight
    /// ([`SurveyError::SyncInProgress`]), when the remote service is unreachable, or when
    /// the pending snapshot cannot be read. Past that point every per-record error is
    /// collected into the returned report and the run carries on.
    pub async fn sync_all(&self) -> Result<SyncReport, SurveyError> {
        let _guard = RunGuard::acquire(&self.running)?;

        if !self.reachability.is_reachable().await {
            return Err(SurveyError::NetworkUnreachable(
                "remote service is not reachable; records stay pending".to_owned(),
            ));
        }

        let mut report = SyncReport::new(now_rfc3339()?);
        let PendingRecords {
            projects,
            sections,
            groups,
            trees,
        } = self.store.pending_snapshot()?;

        let pending = projects.len() + sections.len() + groups.len() + trees.len();
        if pending == 0 {
            info!("nothing to sync");
            let finished = now_rfc3339()?;
            return Ok(report.finish(finished, None));
        }
        info!(
            projects = projects.len(),
            sections = sections.len(),
            groups = groups.len(),
            trees = trees.len(),
            "sync run started"
        );

        let ctx = StageContext {
            store: self.store.as_ref(),
            identity: &self.identity,
            remote: self.remote.as_ref(),
            request_timeout: self.options.request_timeout,
        };
        LevelStage::new(projects).run(&ctx, &mut report).await;
        LevelStage::new(sections).run(&ctx, &mut report).await;
        LevelStage::new(groups).run(&ctx, &mut report).await;
        LevelStage::new(trees).run(&ctx, &mut report).await;

        let finished = now_rfc3339()?;
        let last_synced_at = if report.is_clean() {
            match self.store.set_last_sync_at(&finished) {
                Ok(()) => Some(finished.clone()),
                Err(err) => {
                    warn!(error = %err, "failed to persist last sync time");
                    None
                }
            }
        } else {
            None
        };

        let report = report.finish(finished, last_synced_at);
        info!(
            succeeded = report.total_succeeded(),
            failed = report.total_failed(),
            remapped = report.remaps.len(),
            "sync run finished"
        );
        Ok(report)
    }
}

/// Holds the single-run flag for the lifetime of a run.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Result<Self, SurveyError> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SurveyError::SyncInProgress)?;
        Ok(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

fn now_rfc3339() -> Result<String, SurveyError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| SurveyError::StorageUnavailable(err.to_string()))
}
