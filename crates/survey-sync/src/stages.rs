use std::future::Future;
use std::time::Duration;

use survey_core::{CommitOutcome, RemoteService, SurveyEntity, SurveyError, SurveyStore};
use tracing::{info, warn};

use crate::identity::IdentityManager;
use crate::report::{IdRemap, SyncReport};

/// What the engine needs while uploading one hierarchy level.
pub(crate) struct StageContext<'a, S> {
    pub store: &'a S,
    pub identity: &'a IdentityManager<S>,
    pub remote: &'a dyn RemoteService,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordOutcome {
    Created { remap: IdRemap, commit: CommitOutcome },
    Updated(CommitOutcome),
}

/// One hierarchy level of a run: the snapshot of unsynced records of a single kind,
/// uploaded one at a time.
pub(crate) struct LevelStage<E> {
    records: Vec<E>,
}

impl<E: SurveyEntity> LevelStage<E> {
    pub(crate) fn new(records: Vec<E>) -> Self {
        Self { records }
    }

    pub(crate) async fn run<S: SurveyStore>(
        self,
        ctx: &StageContext<'_, S>,
        report: &mut SyncReport,
    ) {
        if self.records.is_empty() {
            return;
        }
        info!(kind = %E::KIND, pending = self.records.len(), "syncing level");

        for record in self.records {
            let id = record.id().clone();
            match sync_record(ctx, record).await {
                Ok(RecordOutcome::Created { remap, commit }) => {
                    info!(
                        kind = %E::KIND,
                        local_id = %remap.local_id,
                        server_id = %remap.server_id,
                        children_rewritten = remap.children_rewritten,
                        commit = ?commit,
                        "created record on server"
                    );
                    report.record_success(E::KIND);
                    if commit != CommitOutcome::Synced {
                        report.record_local_change(E::KIND, remap.server_id.clone(), commit);
                    }
                    if commit != CommitOutcome::DeletedLocally {
                        report.record_remap(remap);
                    }
                }
                Ok(RecordOutcome::Updated(commit)) => {
                    info!(kind = %E::KIND, id = %id, commit = ?commit, "updated record on server");
                    report.record_success(E::KIND);
                    if commit != CommitOutcome::Synced {
                        report.record_local_change(E::KIND, id, commit);
                    }
                }
                Err(err) => {
                    warn!(
                        kind = %E::KIND,
                        id = %id,
                        code = err.code(),
                        error = %err,
                        "record sync failed; leaving it pending"
                    );
                    report.record_failure(E::KIND, id, &err);
                }
            }
        }
    }
}

async fn sync_record<S: SurveyStore, E: SurveyEntity>(
    ctx: &StageContext<'_, S>,
    record: E,
) -> Result<RecordOutcome, SurveyError> {
    let sent_modified_at = record.modified_at().map(str::to_owned);
    let outbound = resolve_parent(ctx, record)?;
    let id = outbound.id().clone();

    if !id.is_local() {
        let returned = bounded(
            ctx.request_timeout,
            ctx.remote.update(&id, outbound.to_request(true)),
        )
        .await?;
        let stored = E::from_remote(returned)?;
        if stored.id() != &id {
            return Err(SurveyError::InvalidRecord(format!(
                "update of {} '{id}' answered with id '{}'",
                E::KIND,
                stored.id()
            )));
        }
        let commit = ctx.store.commit_synced(sent_modified_at.as_deref(), stored)?;
        return Ok(RecordOutcome::Updated(commit));
    }

    // A mapping without a retired local record means an earlier run stopped between the
    // create and the local rewrite; finish it with an update instead of a second create.
    let stored = match ctx.identity.mapping(E::KIND, &id)? {
        Some(server_id) => {
            let returned = bounded(
                ctx.request_timeout,
                ctx.remote.update(&server_id, outbound.to_request(true)),
            )
            .await?;
            E::from_remote(returned)?
        }
        None => {
            let returned = bounded(
                ctx.request_timeout,
                ctx.remote.create(outbound.to_request(false)),
            )
            .await?;
            let created = E::from_remote(returned)?;
            if created.id().is_local() {
                return Err(SurveyError::RemoteRejected {
                    status: 200,
                    body: format!("server returned local-looking id '{}'", created.id()),
                });
            }
            ctx.identity.record_mapping(E::KIND, &id, created.id())?;
            created
        }
    };

    let server_id = stored.id().clone();
    let retired = ctx
        .store
        .retire_local_id(&id, sent_modified_at.as_deref(), stored)?;
    Ok(RecordOutcome::Created {
        remap: IdRemap {
            kind: E::KIND,
            local_id: id,
            server_id,
            children_rewritten: retired.children_rewritten,
        },
        commit: retired.outcome,
    })
}

/// Points the record's parent fk at the parent's server id. A parent that is still local
/// at this point has not been created on the server, so the record cannot be sent yet.
fn resolve_parent<S: SurveyStore, E: SurveyEntity>(
    ctx: &StageContext<'_, S>,
    mut record: E,
) -> Result<E, SurveyError> {
    let (Some(parent_kind), Some(parent_id)) = (E::KIND.parent(), record.parent_id()) else {
        return Ok(record);
    };

    let resolved = ctx.identity.resolve(parent_kind, parent_id)?;
    if resolved.is_local() {
        return Err(SurveyError::MappingMissing {
            kind: parent_kind,
            local_id: resolved.to_string(),
        });
    }
    record.set_parent_id(resolved);
    Ok(record)
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, SurveyError>>,
) -> Result<T, SurveyError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SurveyError::RequestTimedOut {
            seconds: limit.as_secs(),
        }),
    }
}

