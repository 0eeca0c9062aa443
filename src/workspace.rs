//! Workspace edit application.
//!
//! A [`WorkspaceEditApplier`] applies a `WorkspaceEdit` to a [`DocumentStore`]
//! under one of the protocol's failure handling strategies.

pub mod applier;
pub mod store;
pub mod text;
pub mod undo;

pub use applier::{EditFailure, EditOutcome, WorkspaceEditApplier};
pub use store::{DocumentSnapshot, DocumentStore, MemoryDocumentStore, StagedChange, StoreError};
pub use text::{apply_text_edits, TextEditError};
pub use undo::{ChangeRecord, UndoFailure, UndoReport, UndoToken};
