//! The document store the workspace edit applier mutates.
//!
//! A store exposes the current version and content of documents and accepts
//! staged changes that only become visible to other users on `commit`. Reads
//! through the store itself always reflect staged changes, so a sequence of
//! staged changes can build on each other.

use crate::types::DocumentUri;
use std::collections::BTreeMap;
use thiserror::Error;

/// Content and version of a document at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub text: String,
    pub version: i32,
}

impl DocumentSnapshot {
    pub fn new(text: impl Into<String>, version: i32) -> Self {
        Self {
            text: text.into(),
            version,
        }
    }
}

/// A primitive mutation staged on a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedChange {
    /// Replace the content of an existing document. Bumps its version.
    Write { uri: DocumentUri, text: String },
    /// Create an empty document. With `overwrite`, an existing document is
    /// emptied instead of failing.
    Create { uri: DocumentUri, overwrite: bool },
    /// Move a document, or every document below a folder URI.
    Rename {
        from: DocumentUri,
        to: DocumentUri,
        overwrite: bool,
    },
    /// Remove a document, or with `recursive` a folder and its contents.
    Delete { uri: DocumentUri, recursive: bool },
}

/// Failures reported by a document store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(DocumentUri),

    #[error("document already exists: {0}")]
    AlreadyExists(DocumentUri),

    #[error("folder is not empty: {0}")]
    NotEmpty(DocumentUri),

    #[error("store failure: {0}")]
    Failed(String),
}

/// Storage collaborator of the workspace edit applier.
pub trait DocumentStore: Send {
    /// Current version of a document, `None` if it does not exist.
    fn get_version(&self, uri: &str) -> Option<i32>;

    /// Current content of a document, `None` if it does not exist.
    fn get_content(&self, uri: &str) -> Option<String>;

    /// Documents stored below `uri` when it denotes a folder.
    fn documents_under(&self, _uri: &str) -> Vec<DocumentUri> {
        Vec::new()
    }

    /// Whether `uri` names a document or a non-empty folder.
    fn exists(&self, uri: &str) -> bool {
        self.get_content(uri).is_some() || !self.documents_under(uri).is_empty()
    }

    /// Stage a change without making it visible outside the store.
    fn stage(&mut self, change: StagedChange) -> Result<(), StoreError>;

    /// Make every staged change visible at once.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard every staged change.
    fn rollback(&mut self);
}

/// Snapshot of `uri` as seen through `store`.
pub fn snapshot<S: DocumentStore + ?Sized>(store: &S, uri: &str) -> Option<DocumentSnapshot> {
    let text = store.get_content(uri)?;
    let version = store.get_version(uri).unwrap_or(0);
    Some(DocumentSnapshot { text, version })
}

fn folder_prefix(uri: &str) -> String {
    format!("{}/", uri.trim_end_matches('/'))
}

/// An in-memory document store.
///
/// Staging works on a copy of the committed documents which replaces them on
/// commit.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    committed: BTreeMap<DocumentUri, DocumentSnapshot>,
    staged: Option<BTreeMap<DocumentUri, DocumentSnapshot>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a document into the committed state.
    pub fn open(&mut self, uri: impl Into<DocumentUri>, text: impl Into<String>, version: i32) {
        self.committed
            .insert(uri.into(), DocumentSnapshot::new(text, version));
    }

    /// Builder form of [`MemoryDocumentStore::open`].
    pub fn with_document(
        mut self,
        uri: impl Into<DocumentUri>,
        text: impl Into<String>,
        version: i32,
    ) -> Self {
        self.open(uri, text, version);
        self
    }

    /// Committed content of a document, ignoring staged changes.
    pub fn committed_text(&self, uri: &str) -> Option<&str> {
        self.committed.get(uri).map(|doc| doc.text.as_str())
    }

    /// Committed version of a document, ignoring staged changes.
    pub fn committed_version(&self, uri: &str) -> Option<i32> {
        self.committed.get(uri).map(|doc| doc.version)
    }

    /// URIs of every committed document.
    pub fn uris(&self) -> Vec<DocumentUri> {
        self.committed.keys().cloned().collect()
    }

    pub fn has_staged_changes(&self) -> bool {
        self.staged.is_some()
    }

    fn view(&self) -> &BTreeMap<DocumentUri, DocumentSnapshot> {
        self.staged.as_ref().unwrap_or(&self.committed)
    }

    fn view_mut(&mut self) -> &mut BTreeMap<DocumentUri, DocumentSnapshot> {
        let committed = &self.committed;
        self.staged.get_or_insert_with(|| committed.clone())
    }

    fn children(&self, uri: &str) -> Vec<DocumentUri> {
        let prefix = folder_prefix(uri);
        self.view()
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn stage_rename(&mut self, from: &str, to: &str, overwrite: bool) -> Result<(), StoreError> {
        let mut moves = Vec::new();
        if self.view().contains_key(from) {
            moves.push((from.to_string(), to.to_string()));
        }
        let to_prefix = folder_prefix(to);
        let from_prefix = folder_prefix(from);
        for child in self.children(from) {
            let target = format!("{}{}", to_prefix, &child[from_prefix.len()..]);
            moves.push((child, target));
        }
        if moves.is_empty() {
            return Err(StoreError::NotFound(from.to_string()));
        }
        if !overwrite {
            if let Some((_, target)) = moves.iter().find(|(_, t)| self.view().contains_key(t)) {
                return Err(StoreError::AlreadyExists(target.clone()));
            }
        }

        let view = self.view_mut();
        let mut moved = Vec::with_capacity(moves.len());
        for (source, target) in moves {
            if let Some(doc) = view.remove(&source) {
                moved.push((target, doc));
            }
        }
        view.extend(moved);
        Ok(())
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get_version(&self, uri: &str) -> Option<i32> {
        self.view().get(uri).map(|doc| doc.version)
    }

    fn get_content(&self, uri: &str) -> Option<String> {
        self.view().get(uri).map(|doc| doc.text.clone())
    }

    fn documents_under(&self, uri: &str) -> Vec<DocumentUri> {
        self.children(uri)
    }

    fn stage(&mut self, change: StagedChange) -> Result<(), StoreError> {
        match change {
            StagedChange::Write { uri, text } => {
                let doc = self
                    .view_mut()
                    .get_mut(&uri)
                    .ok_or(StoreError::NotFound(uri.clone()))?;
                doc.text = text;
                doc.version += 1;
                Ok(())
            }
            StagedChange::Create { uri, overwrite } => {
                let view = self.view_mut();
                match view.get_mut(&uri) {
                    Some(_) if !overwrite => Err(StoreError::AlreadyExists(uri)),
                    Some(doc) => {
                        doc.text.clear();
                        doc.version += 1;
                        Ok(())
                    }
                    None => {
                        view.insert(uri, DocumentSnapshot::new("", 0));
                        Ok(())
                    }
                }
            }
            StagedChange::Rename { from, to, overwrite } => self.stage_rename(&from, &to, overwrite),
            StagedChange::Delete { uri, recursive } => {
                let children = self.children(&uri);
                if !children.is_empty() && !recursive {
                    return Err(StoreError::NotEmpty(uri));
                }
                let view = self.view_mut();
                let removed_file = view.remove(&uri).is_some();
                for child in &children {
                    view.remove(child);
                }
                if removed_file || !children.is_empty() {
                    Ok(())
                } else {
                    Err(StoreError::NotFound(uri))
                }
            }
        }
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(staged) = self.staged.take() {
            self.committed = staged;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged = None;
    }
}
