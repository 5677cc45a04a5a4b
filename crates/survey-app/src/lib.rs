use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use integration_http::{HttpServiceConfig, HttpSurveyService};
use serde::Serialize;
use survey_config::SurveyConfig;
use survey_core::{
    CommitOutcome, EntityKind, KindCounts, PendingRecords, Reachability, RemoteService, SqliteSurveyStore,
    SurveyEntity, SurveyError, SurveyStore,
};
use survey_sync::{ImportDocument, LocalEditor, SyncManager, SyncOptions, SyncReport};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub unsynced: KindCounts,
    pub total_unsynced: usize,
    pub last_sync_at: Option<String>,
}

/// Everything the `tree-survey` commands need, wired once at startup.
pub struct App<S: SurveyStore> {
    store: Arc<S>,
    editor: LocalEditor<S>,
    sync: SyncManager<S>,
}

impl App<SqliteSurveyStore> {
    pub fn from_config(config: &SurveyConfig) -> Result<Self, SurveyError> {
        let store = SqliteSurveyStore::open_with_options(&config.store_path, config.store_options())?;
        let http = Arc::new(HttpSurveyService::new(HttpServiceConfig {
            base_url: config.server.base_url.clone(),
            request_timeout: config.server_request_timeout(),
            reachability_timeout: config.reachability_timeout(),
        })?);
        info!(
            store = %config.store_path,
            server = %config.server.base_url,
            "tree-survey initialized"
        );

        Ok(Self::new(
            Arc::new(store),
            http.clone(),
            http,
            SyncOptions {
                request_timeout: config.sync_request_timeout(),
            },
        ))
    }
}

impl<S: SurveyStore> App<S> {
    pub fn new(
        store: Arc<S>,
        remote: Arc<dyn RemoteService>,
        reachability: Arc<dyn Reachability>,
        options: SyncOptions,
    ) -> Self {
        Self {
            editor: LocalEditor::new(Arc::clone(&store)),
            sync: SyncManager::with_options(Arc::clone(&store), remote, reachability, options),
            store,
        }
    }

    pub fn status(&self) -> Result<StatusView, SurveyError> {
        let unsynced = self.store.unsynced_counts()?;
        Ok(StatusView {
            total_unsynced: unsynced.total(),
            unsynced,
            last_sync_at: self.store.last_sync_at()?,
        })
    }

    pub fn pending(&self) -> Result<PendingRecords, SurveyError> {
        self.store.pending_snapshot()
    }

    pub async fn sync(&self) -> Result<SyncReport, SurveyError> {
        self.sync.sync_all().await
    }

    pub fn import_file(&self, path: &Path) -> Result<KindCounts, SurveyError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SurveyError::InvalidRecord(format!("cannot read {}: {err}", path.display()))
        })?;
        let document: ImportDocument = serde_json::from_str(&raw).map_err(|err| {
            SurveyError::InvalidRecord(format!("{} is not a valid import document: {err}", path.display()))
        })?;
        self.editor.import(document)
    }
}

pub fn render_status(status: &StatusView) -> String {
    let mut out = String::new();
    for kind in EntityKind::HIERARCHY {
        let _ = writeln!(out, "{:<10}{:>6} unsynced", kind.collection(), status.unsynced.get(kind));
    }
    let _ = writeln!(out, "{:<10}{:>6} unsynced", "total", status.total_unsynced);
    let _ = writeln!(
        out,
        "last sync: {}",
        status.last_sync_at.as_deref().unwrap_or("never")
    );
    out
}

pub fn render_pending(pending: &PendingRecords) -> String {
    if pending.is_empty() {
        return "nothing pending\n".to_owned();
    }

    let mut out = String::new();
    for project in &pending.projects {
        push_pending_line(&mut out, project, &project.name);
    }
    for section in &pending.sections {
        push_pending_line(&mut out, section, &section.name);
    }
    for group in &pending.groups {
        push_pending_line(&mut out, group, &group.name);
    }
    for tree in &pending.trees {
        push_pending_line(&mut out, tree, tree.species.as_deref().unwrap_or("-"));
    }
    out
}

fn push_pending_line<E: SurveyEntity>(out: &mut String, record: &E, label: &str) {
    let _ = writeln!(
        out,
        "{:<8}{:<12}{}  {label}",
        E::KIND.as_str(),
        record.sync_status().as_str(),
        record.id()
    );
}

pub fn render_report(report: &SyncReport) -> String {
    let mut out = String::new();
    for (kind, outcome) in &report.outcomes {
        let _ = writeln!(
            out,
            "{:<10}{:>4} synced{:>4} failed",
            kind.collection(),
            outcome.succeeded,
            outcome.failed
        );
    }
    for remap in &report.remaps {
        let _ = writeln!(
            out,
            "{} {} -> {} ({} children updated)",
            remap.kind, remap.local_id, remap.server_id, remap.children_rewritten
        );
    }
    for change in &report.local_changes {
        let note = match change.outcome {
            CommitOutcome::KeptLocalEdits => "edited during the run; local changes kept for next sync",
            CommitOutcome::DeletedLocally => "deleted during the run; not restored",
            CommitOutcome::Synced => continue,
        };
        let _ = writeln!(out, "{} {} {note}", change.kind, change.id);
    }
    for failure in &report.failures {
        let _ = writeln!(
            out,
            "FAILED {} {} [{}]: {}",
            failure.kind, failure.id, failure.code, failure.reason
        );
    }
    let failed = report.total_failed();
    if failed > 0 {
        let _ = writeln!(out, "{failed} record(s) left pending");
    } else if report.total_succeeded() == 0 {
        let _ = writeln!(out, "nothing to sync");
    } else {
        let finished = report.finished_at.as_deref().unwrap_or("unknown time");
        let _ = writeln!(out, "sync complete at {finished}");
    }
    out
}
