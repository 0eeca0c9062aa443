//! Applying a `WorkspaceEdit` under a failure handling strategy.

use crate::config::UndoRetention;
use crate::error::{LspError, Result};
use crate::types::{
    AnyTextEdit, ApplyWorkspaceEditParams, ApplyWorkspaceEditResult, ChangeAnnotation,
    ChangeAnnotationIdentifier, DocumentChange, DocumentUri, FailureHandlingKind,
    ResourceOperation, WorkspaceEdit,
};
use crate::workspace::store::{snapshot, DocumentSnapshot, DocumentStore, StagedChange, StoreError};
use crate::workspace::text::{apply_text_edits, TextEditError};
use crate::workspace::undo::{ChangeRecord, UndoFailure, UndoJournal, UndoReport, UndoToken};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;

/// Why a change of a workspace edit was not applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditFailure {
    #[error("version conflict on {uri}: edit targets version {expected}, document is at {actual:?}")]
    VersionMismatch {
        uri: DocumentUri,
        expected: i32,
        actual: Option<i32>,
    },

    #[error("document not found: {0}")]
    DocumentNotFound(DocumentUri),

    #[error("document already exists: {0}")]
    AlreadyExists(DocumentUri),

    #[error("invalid document URI: {0}")]
    InvalidUri(String),

    #[error("invalid text edit for {uri}: {source}")]
    InvalidEdit {
        uri: DocumentUri,
        #[source]
        source: TextEditError,
    },

    #[error("unknown change annotation: {0}")]
    UnknownAnnotation(ChangeAnnotationIdentifier),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EditFailure {
    /// The document the failure is about, when there is one.
    pub fn uri(&self) -> Option<&str> {
        match self {
            EditFailure::VersionMismatch { uri, .. }
            | EditFailure::DocumentNotFound(uri)
            | EditFailure::AlreadyExists(uri)
            | EditFailure::InvalidEdit { uri, .. }
            | EditFailure::InvalidUri(uri) => Some(uri.as_str()),
            EditFailure::Store(
                StoreError::NotFound(uri) | StoreError::AlreadyExists(uri) | StoreError::NotEmpty(uri),
            ) => Some(uri.as_str()),
            EditFailure::UnknownAnnotation(_) | EditFailure::Store(StoreError::Failed(_)) => None,
        }
    }
}

/// Result of one application attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    /// Whether the whole edit took effect.
    pub applied: bool,
    /// Number of changes that took effect and are still applied.
    pub applied_changes: usize,
    /// Index into the edit's change list of the change that failed. `None`
    /// when the failure was not tied to a single change, e.g. a failed commit.
    pub failed_change: Option<usize>,
    pub failure: Option<EditFailure>,
    /// Journal handle for `FailureHandlingKind::Undo` attempts that changed
    /// something.
    pub undo: Option<UndoToken>,
}

impl EditOutcome {
    fn success(applied_changes: usize) -> Self {
        Self {
            applied: true,
            applied_changes,
            failed_change: None,
            failure: None,
            undo: None,
        }
    }

    fn failed(applied_changes: usize, failed_change: Option<usize>, failure: EditFailure) -> Self {
        Self {
            applied: false,
            applied_changes,
            failed_change,
            failure: Some(failure),
            undo: None,
        }
    }

    /// The wire result of `workspace/applyEdit`.
    pub fn to_result(&self) -> ApplyWorkspaceEditResult {
        ApplyWorkspaceEditResult {
            applied: self.applied,
            failure_reason: self.failure.as_ref().map(ToString::to_string),
            failed_change: self.failed_change.map(|index| index as u32),
        }
    }
}

/// One change of an edit in application order.
#[derive(Debug, Clone)]
enum PlannedChange<'a> {
    Text {
        uri: &'a DocumentUri,
        version: Option<i32>,
        edits: Vec<AnyTextEdit>,
    },
    Resource(&'a ResourceOperation),
}

impl PlannedChange<'_> {
    /// Every URI whose state this change can alter.
    fn affected_uris<S: DocumentStore + ?Sized>(&self, store: &S) -> Vec<DocumentUri> {
        match self {
            PlannedChange::Text { uri, .. } => vec![(*uri).clone()],
            PlannedChange::Resource(ResourceOperation::Create(op)) => vec![op.uri.clone()],
            PlannedChange::Resource(ResourceOperation::Delete(op)) => {
                let mut uris = vec![op.uri.clone()];
                uris.extend(store.documents_under(&op.uri));
                uris
            }
            PlannedChange::Resource(ResourceOperation::Rename(op)) => {
                let mut uris = vec![op.old_uri.clone(), op.new_uri.clone()];
                let old_prefix = format!("{}/", op.old_uri.trim_end_matches('/'));
                let new_prefix = format!("{}/", op.new_uri.trim_end_matches('/'));
                for child in store.documents_under(&op.old_uri) {
                    let target = format!("{}{}", new_prefix, &child[old_prefix.len()..]);
                    uris.push(child);
                    uris.push(target);
                }
                uris.extend(store.documents_under(&op.new_uri));
                uris.sort();
                uris.dedup();
                uris
            }
        }
    }
}

/// Flatten an edit into its ordered list of changes. `document_changes` wins
/// over `changes`; `changes` entries are ordered by URI.
fn plan(edit: &WorkspaceEdit) -> Vec<PlannedChange<'_>> {
    if let Some(document_changes) = &edit.document_changes {
        return document_changes
            .iter()
            .map(|change| match change {
                DocumentChange::TextDocumentEdit(doc_edit) => PlannedChange::Text {
                    uri: &doc_edit.text_document.uri,
                    version: doc_edit.text_document.version,
                    edits: doc_edit.edits.clone(),
                },
                DocumentChange::ResourceOperation(op) => PlannedChange::Resource(op),
            })
            .collect();
    }

    let mut entries: Vec<_> = edit.changes.iter().flatten().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    entries
        .into_iter()
        .map(|(uri, edits)| PlannedChange::Text {
            uri,
            version: None,
            edits: edits.iter().cloned().map(AnyTextEdit::from).collect(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Transactional,
    Abort { journal: bool },
}

fn strategy(kind: FailureHandlingKind, edit: &WorkspaceEdit) -> Strategy {
    match kind {
        FailureHandlingKind::Abort => Strategy::Abort { journal: false },
        FailureHandlingKind::Transactional => Strategy::Transactional,
        FailureHandlingKind::TextOnlyTransactional if edit.has_resource_operations() => {
            Strategy::Abort { journal: false }
        }
        FailureHandlingKind::TextOnlyTransactional => Strategy::Transactional,
        FailureHandlingKind::Undo => Strategy::Abort { journal: true },
    }
}

/// Per-attempt validation state.
struct Attempt<'a> {
    /// Document versions as first seen by this attempt.
    baseline: HashMap<DocumentUri, Option<i32>>,
    /// Versions left behind by this attempt's own commits.
    produced: HashMap<DocumentUri, Option<i32>>,
    annotations: Option<&'a HashMap<ChangeAnnotationIdentifier, ChangeAnnotation>>,
}

impl<'a> Attempt<'a> {
    fn new(edit: &'a WorkspaceEdit) -> Self {
        Self {
            baseline: HashMap::new(),
            produced: HashMap::new(),
            annotations: edit.change_annotations.as_ref(),
        }
    }

    fn capture<S: DocumentStore + ?Sized>(&mut self, store: &S, uri: &str) -> Option<i32> {
        *self
            .baseline
            .entry(uri.to_string())
            .or_insert_with(|| store.get_version(uri))
    }

    /// Remember the versions this attempt committed for `uris`.
    fn record_committed<S: DocumentStore + ?Sized>(&mut self, store: &S, uris: &[DocumentUri]) {
        for uri in uris {
            self.produced.insert(uri.clone(), store.get_version(uri));
        }
    }

    fn check_annotation(&self, id: Option<&str>) -> std::result::Result<(), EditFailure> {
        match id {
            Some(id) if !self.annotations.map_or(false, |a| a.contains_key(id)) => {
                Err(EditFailure::UnknownAnnotation(id.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Validate one change against the store and stage it.
    fn stage<S: DocumentStore + ?Sized>(
        &mut self,
        store: &mut S,
        change: &PlannedChange<'_>,
    ) -> std::result::Result<(), EditFailure> {
        for uri in change.affected_uris(&*store) {
            self.capture(&*store, &uri);
        }

        match change {
            PlannedChange::Text {
                uri,
                version,
                edits,
            } => {
                validate_uri(uri)?;
                for edit in edits {
                    self.check_annotation(edit.annotation_id())?;
                }
                let actual = self.capture(&*store, uri);
                if let Some(expected) = *version {
                    let current = store.get_version(uri);
                    if let Some(produced) = self.produced.get(*uri) {
                        if current != *produced {
                            return Err(EditFailure::VersionMismatch {
                                uri: (*uri).clone(),
                                expected,
                                actual: current,
                            });
                        }
                    }
                    if actual != Some(expected) {
                        return Err(EditFailure::VersionMismatch {
                            uri: (*uri).clone(),
                            expected,
                            actual,
                        });
                    }
                }
                let content = store
                    .get_content(uri)
                    .ok_or_else(|| EditFailure::DocumentNotFound((*uri).clone()))?;
                let text = apply_text_edits(&content, edits).map_err(|source| {
                    EditFailure::InvalidEdit {
                        uri: (*uri).clone(),
                        source,
                    }
                })?;
                store.stage(StagedChange::Write {
                    uri: (*uri).clone(),
                    text,
                })?;
            }
            PlannedChange::Resource(op) => {
                self.check_annotation(op.annotation_id())?;
                stage_resource(store, op)?;
            }
        }
        Ok(())
    }
}

fn validate_uri(uri: &str) -> std::result::Result<(), EditFailure> {
    url::Url::parse(uri)
        .map(|_| ())
        .map_err(|_| EditFailure::InvalidUri(uri.to_string()))
}

fn stage_resource<S: DocumentStore + ?Sized>(
    store: &mut S,
    op: &ResourceOperation,
) -> std::result::Result<(), EditFailure> {
    match op {
        ResourceOperation::Create(create) => {
            validate_uri(&create.uri)?;
            let options = create.options.clone().unwrap_or_default();
            let overwrite = options.overwrite.unwrap_or(false);
            if store.get_content(&create.uri).is_some() && !overwrite {
                if options.ignore_if_exists.unwrap_or(false) {
                    log::debug!("Skipping create of existing {}", create.uri);
                    return Ok(());
                }
                return Err(EditFailure::AlreadyExists(create.uri.clone()));
            }
            store.stage(StagedChange::Create {
                uri: create.uri.clone(),
                overwrite,
            })?;
        }
        ResourceOperation::Rename(rename) => {
            validate_uri(&rename.old_uri)?;
            validate_uri(&rename.new_uri)?;
            if !store.exists(&rename.old_uri) {
                return Err(EditFailure::DocumentNotFound(rename.old_uri.clone()));
            }
            let options = rename.options.clone().unwrap_or_default();
            let overwrite = options.overwrite.unwrap_or(false);
            if store.exists(&rename.new_uri) && !overwrite {
                if options.ignore_if_exists.unwrap_or(false) {
                    log::debug!("Skipping rename onto existing {}", rename.new_uri);
                    return Ok(());
                }
                return Err(EditFailure::AlreadyExists(rename.new_uri.clone()));
            }
            store.stage(StagedChange::Rename {
                from: rename.old_uri.clone(),
                to: rename.new_uri.clone(),
                overwrite,
            })?;
        }
        ResourceOperation::Delete(delete) => {
            validate_uri(&delete.uri)?;
            let options = delete.options.clone().unwrap_or_default();
            if !store.exists(&delete.uri) {
                if options.ignore_if_not_exists.unwrap_or(false) {
                    log::debug!("Skipping delete of missing {}", delete.uri);
                    return Ok(());
                }
                return Err(EditFailure::DocumentNotFound(delete.uri.clone()));
            }
            store.stage(StagedChange::Delete {
                uri: delete.uri.clone(),
                recursive: options.recursive.unwrap_or(false),
            })?;
        }
    }
    Ok(())
}

fn snapshots<S: DocumentStore + ?Sized>(
    store: &S,
    uris: &[DocumentUri],
) -> Vec<Option<DocumentSnapshot>> {
    uris.iter().map(|uri| snapshot(store, uri)).collect()
}

/// Applies workspace edits to a shared [`DocumentStore`].
///
/// Transactional attempts hold the store lock for the whole attempt; abort
/// and undo attempts take it once per change. A versioned change to a
/// document an earlier change of the same attempt already committed fails if
/// anything else has written the document in between.
pub struct WorkspaceEditApplier<S> {
    store: Arc<Mutex<S>>,
    journal: Mutex<UndoJournal>,
}

impl<S: DocumentStore + 'static> WorkspaceEditApplier<S> {
    pub fn new(store: S, retention: UndoRetention) -> Self {
        Self::with_shared_store(Arc::new(Mutex::new(store)), retention)
    }

    pub fn with_shared_store(store: Arc<Mutex<S>>, retention: UndoRetention) -> Self {
        Self {
            store,
            journal: Mutex::new(UndoJournal::new(retention)),
        }
    }

    /// The store this applier mutates.
    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }

    /// Apply `edit` under `kind`.
    pub async fn apply(&self, edit: &WorkspaceEdit, kind: FailureHandlingKind) -> EditOutcome {
        self.apply_labeled(None, edit, kind).await
    }

    /// Apply `edit` under `kind`, naming the attempt in the undo journal.
    pub async fn apply_labeled(
        &self,
        label: Option<&str>,
        edit: &WorkspaceEdit,
        kind: FailureHandlingKind,
    ) -> EditOutcome {
        let changes = plan(edit);
        let outcome = match strategy(kind, edit) {
            Strategy::Transactional => self.apply_transactional(edit, &changes).await,
            Strategy::Abort { journal } => {
                let (mut outcome, records) = self.apply_in_order(edit, &changes, journal).await;
                if journal && !records.is_empty() {
                    let mut undo = self.journal.lock().await;
                    outcome.undo =
                        Some(undo.record(label.map(str::to_string), records, Instant::now()));
                }
                outcome
            }
        };

        match &outcome.failure {
            Some(failure) => log::warn!(
                "Workspace edit{} not applied ({:?}): change {:?} failed: {}",
                label.map(|l| format!(" '{}'", l)).unwrap_or_default(),
                kind,
                outcome.failed_change,
                failure
            ),
            None => log::debug!(
                "Applied workspace edit with {} change(s) ({:?})",
                outcome.applied_changes,
                kind
            ),
        }
        outcome
    }

    async fn apply_transactional(
        &self,
        edit: &WorkspaceEdit,
        changes: &[PlannedChange<'_>],
    ) -> EditOutcome {
        let mut store = self.store.lock().await;
        let mut attempt = Attempt::new(edit);

        for (index, change) in changes.iter().enumerate() {
            if let Err(failure) = attempt.stage(&mut *store, change) {
                store.rollback();
                return EditOutcome::failed(0, Some(index), failure);
            }
        }

        if let Err(e) = store.commit() {
            store.rollback();
            return EditOutcome::failed(0, None, EditFailure::Store(e));
        }
        EditOutcome::success(changes.len())
    }

    async fn apply_in_order(
        &self,
        edit: &WorkspaceEdit,
        changes: &[PlannedChange<'_>],
        journal: bool,
    ) -> (EditOutcome, Vec<ChangeRecord>) {
        let mut attempt = Attempt::new(edit);
        let mut records = Vec::new();

        for (index, change) in changes.iter().enumerate() {
            let mut store = self.store.lock().await;

            let uris = change.affected_uris(&*store);
            let before = if journal {
                snapshots(&*store, &uris)
            } else {
                Vec::new()
            };

            let staged = attempt
                .stage(&mut *store, change)
                .map_err(|failure| (Some(index), failure));
            let after = if journal {
                snapshots(&*store, &uris)
            } else {
                Vec::new()
            };
            let committed = staged.and_then(|_| {
                store
                    .commit()
                    .map_err(|e| (Some(index), EditFailure::Store(e)))
            });

            if let Err((failed_change, failure)) = committed {
                store.rollback();
                return (
                    EditOutcome::failed(index, failed_change, failure),
                    records,
                );
            }

            attempt.record_committed(&*store, &uris);
            if !journal {
                continue;
            }
            records.extend(
                uris.into_iter()
                    .zip(before.into_iter().zip(after))
                    .filter(|(_, (before, after))| before != after)
                    .map(|(uri, (before, after))| ChangeRecord { uri, before, after }),
            );
        }

        (EditOutcome::success(changes.len()), records)
    }

    /// Best-effort reversal of an attempt recorded under
    /// `FailureHandlingKind::Undo`.
    ///
    /// Records are reverted newest first. A document that no longer matches
    /// the state the edit left it in is not touched and is reported as a
    /// failure, as is any record the store refuses.
    pub async fn undo(&self, token: UndoToken) -> Result<UndoReport> {
        let records = self
            .journal
            .lock()
            .await
            .take(token, Instant::now())
            .ok_or(LspError::UndoExpired(token.0))?;

        let mut report = UndoReport::default();
        for record in records.into_iter().rev() {
            let mut store = self.store.lock().await;
            let current = snapshot(&*store, &record.uri);
            let stale = current.as_ref().map(|doc| &doc.text)
                != record.after.as_ref().map(|doc| &doc.text);
            if stale {
                report.failures.push(UndoFailure {
                    uri: record.uri.clone(),
                    reason: "document changed after the edit was applied".to_string(),
                });
                continue;
            }

            match restore(&mut *store, &record) {
                Ok(()) => report.reverted.push(record.uri.clone()),
                Err(e) => {
                    store.rollback();
                    report.failures.push(UndoFailure {
                        uri: record.uri.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if report.is_complete() {
            log::debug!("Undo {} complete: {}", token, report);
        } else {
            log::warn!("Undo {} incomplete: {}", token, report);
        }
        Ok(report)
    }

    /// Serve a `workspace/applyEdit` request. Under `FailureHandlingKind::Undo`
    /// a failed attempt is undone right away and the undo outcome is added
    /// to the failure reason.
    pub async fn apply_params(
        &self,
        params: &ApplyWorkspaceEditParams,
        kind: FailureHandlingKind,
    ) -> ApplyWorkspaceEditResult {
        let outcome = self
            .apply_labeled(params.label.as_deref(), &params.edit, kind)
            .await;
        let mut result = outcome.to_result();

        if let (false, Some(token)) = (outcome.applied, outcome.undo) {
            let note = match self.undo(token).await {
                Ok(report) => report.to_string(),
                Err(e) => e.to_string(),
            };
            result.failure_reason = Some(match result.failure_reason {
                Some(reason) => format!("{}; {}", reason, note),
                None => note,
            });
        }
        result
    }

    /// Number of undo journals currently retained.
    pub async fn retained_undo_entries(&self) -> usize {
        let mut journal = self.journal.lock().await;
        journal.prune(Instant::now());
        journal.len()
    }
}

/// Put a document back into its `before` state and commit.
fn restore<S: DocumentStore + ?Sized>(
    store: &mut S,
    record: &ChangeRecord,
) -> std::result::Result<(), StoreError> {
    let uri = record.uri.clone();
    match (&record.before, &record.after) {
        (None, Some(_)) => store.stage(StagedChange::Delete {
            uri,
            recursive: false,
        })?,
        (Some(before), None) => {
            store.stage(StagedChange::Create {
                uri: uri.clone(),
                overwrite: false,
            })?;
            store.stage(StagedChange::Write {
                uri,
                text: before.text.clone(),
            })?;
        }
        (Some(before), Some(_)) => store.stage(StagedChange::Write {
            uri,
            text: before.text.clone(),
        })?,
        (None, None) => return Ok(()),
    }
    store.commit()
}
