//! Text and workspace edit types as defined by the Language Server Protocol.
//!
//! These are the structures the workspace edit applier consumes: positions and
//! ranges, text edits, versioned document identifiers, resource operations and
//! the `WorkspaceEdit` that bundles them.

use crate::types::DocumentUri;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Position in a text document expressed as zero-based line and character offset.
/// The offsets are based on a UTF-16 string representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Line position in a document (zero-based).
    pub line: u32,
    /// Character offset on a line in a document (zero-based).
    /// If the character value is greater than the line length it defaults back
    /// to the line length.
    pub character: u32,
}

impl Position {
    /// Create a new position.
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    /// Create a position at the start of a document.
    pub fn start() -> Self {
        Self::new(0, 0)
    }
}

/// A range in a text document expressed as (zero-based) start and end positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// The range's start position.
    pub start: Position,
    /// The range's end position.
    pub end: Position,
}

impl Range {
    /// Create a new range.
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Create a range from line/character coordinates.
    pub fn from_coords(start_line: u32, start_char: u32, end_line: u32, end_char: u32) -> Self {
        Self::new(
            Position::new(start_line, start_char),
            Position::new(end_line, end_char),
        )
    }

    /// Check if this range contains the given position.
    pub fn contains(&self, position: Position) -> bool {
        position >= self.start && position < self.end
    }

    /// Check if this range is empty (start equals end).
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A text edit applicable to a text document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    /// The range of the text document to be manipulated.
    pub range: Range,
    /// The string to be inserted. For delete operations use an empty string.
    pub new_text: String,
}

impl TextEdit {
    /// Create a new text edit.
    pub fn new(range: Range, new_text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }

    /// Create a text edit that inserts text at a position.
    pub fn insert(position: Position, text: impl Into<String>) -> Self {
        Self::new(Range::new(position, position), text)
    }

    /// Create a text edit that deletes a range.
    pub fn delete(range: Range) -> Self {
        Self::new(range, "")
    }

    /// Create a text edit that replaces a range with new text.
    pub fn replace(range: Range, new_text: impl Into<String>) -> Self {
        Self::new(range, new_text)
    }
}

/// Additional information that describes document changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAnnotation {
    /// A human-readable string describing the actual change.
    pub label: String,

    /// A flag which indicates that user confirmation is needed before applying the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_confirmation: Option<bool>,

    /// A human-readable string which is rendered less prominent in the user interface.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An identifier referring to a change annotation managed by a workspace edit.
pub type ChangeAnnotationIdentifier = String;

/// A special text edit with an additional change annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedTextEdit {
    /// The range of the text document to be manipulated.
    pub range: Range,
    /// The string to be inserted.
    pub new_text: String,
    /// The actual identifier of the change annotation.
    pub annotation_id: ChangeAnnotationIdentifier,
}

/// Either a plain or an annotated text edit.
///
/// The annotated form is tried first so the annotation id is not lost.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyTextEdit {
    Annotated(AnnotatedTextEdit),
    Plain(TextEdit),
}

impl AnyTextEdit {
    pub fn range(&self) -> Range {
        match self {
            AnyTextEdit::Annotated(edit) => edit.range,
            AnyTextEdit::Plain(edit) => edit.range,
        }
    }

    pub fn new_text(&self) -> &str {
        match self {
            AnyTextEdit::Annotated(edit) => &edit.new_text,
            AnyTextEdit::Plain(edit) => &edit.new_text,
        }
    }

    pub fn annotation_id(&self) -> Option<&str> {
        match self {
            AnyTextEdit::Annotated(edit) => Some(&edit.annotation_id),
            AnyTextEdit::Plain(_) => None,
        }
    }
}

impl From<TextEdit> for AnyTextEdit {
    fn from(edit: TextEdit) -> Self {
        AnyTextEdit::Plain(edit)
    }
}

impl From<AnnotatedTextEdit> for AnyTextEdit {
    fn from(edit: AnnotatedTextEdit) -> Self {
        AnyTextEdit::Annotated(edit)
    }
}

/// Describes textual changes on a text document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentEdit {
    /// The text document to change.
    pub text_document: OptionalVersionedTextDocumentIdentifier,
    /// The edits to be applied.
    pub edits: Vec<AnyTextEdit>,
}

impl TextDocumentEdit {
    /// Create a document edit from plain text edits.
    pub fn new(
        text_document: OptionalVersionedTextDocumentIdentifier,
        edits: impl IntoIterator<Item = TextEdit>,
    ) -> Self {
        Self {
            text_document,
            edits: edits.into_iter().map(AnyTextEdit::from).collect(),
        }
    }
}

/// A generic resource operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceOperation {
    Create(CreateFile),
    Rename(RenameFile),
    Delete(DeleteFile),
}

impl ResourceOperation {
    /// The kind of this operation.
    pub fn kind(&self) -> ResourceOperationKind {
        match self {
            ResourceOperation::Create(_) => ResourceOperationKind::Create,
            ResourceOperation::Rename(_) => ResourceOperationKind::Rename,
            ResourceOperation::Delete(_) => ResourceOperationKind::Delete,
        }
    }

    /// The annotation attached to this operation, if any.
    pub fn annotation_id(&self) -> Option<&str> {
        match self {
            ResourceOperation::Create(op) => op.annotation_id.as_deref(),
            ResourceOperation::Rename(op) => op.annotation_id.as_deref(),
            ResourceOperation::Delete(op) => op.annotation_id.as_deref(),
        }
    }
}

/// Create file operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFile {
    /// The resource to create.
    pub uri: DocumentUri,
    /// Additional options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<CreateFileOptions>,
    /// An optional annotation identifier describing the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_id: Option<ChangeAnnotationIdentifier>,
}

impl CreateFile {
    pub fn new(uri: impl Into<DocumentUri>) -> Self {
        Self {
            uri: uri.into(),
            options: None,
            annotation_id: None,
        }
    }
}

/// Options to create a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileOptions {
    /// Overwrite existing file. Overwrite wins over `ignore_if_exists`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
    /// Ignore if exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_if_exists: Option<bool>,
}

/// Rename file operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFile {
    /// The old (existing) location.
    pub old_uri: DocumentUri,
    /// The new location.
    pub new_uri: DocumentUri,
    /// Rename options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<RenameFileOptions>,
    /// An optional annotation identifier describing the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_id: Option<ChangeAnnotationIdentifier>,
}

impl RenameFile {
    pub fn new(old_uri: impl Into<DocumentUri>, new_uri: impl Into<DocumentUri>) -> Self {
        Self {
            old_uri: old_uri.into(),
            new_uri: new_uri.into(),
            options: None,
            annotation_id: None,
        }
    }
}

/// Rename file options
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFileOptions {
    /// Overwrite target if existing. Overwrite wins over `ignore_if_exists`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
    /// Ignores if target exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_if_exists: Option<bool>,
}

/// Delete file operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFile {
    /// The file to delete.
    pub uri: DocumentUri,
    /// Delete options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<DeleteFileOptions>,
    /// An optional annotation identifier describing the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_id: Option<ChangeAnnotationIdentifier>,
}

impl DeleteFile {
    pub fn new(uri: impl Into<DocumentUri>) -> Self {
        Self {
            uri: uri.into(),
            options: None,
            annotation_id: None,
        }
    }
}

/// Delete file options
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileOptions {
    /// Delete the content recursively if a folder is denoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    /// Ignore the operation if the file doesn't exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_if_not_exists: Option<bool>,
}

/// A workspace edit represents changes to many resources managed in the workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEdit {
    /// Holds changes to existing resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<HashMap<DocumentUri, Vec<TextEdit>>>,

    /// An ordered list of text document edits and resource operations. When
    /// present it is preferred over `changes`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_changes: Option<Vec<DocumentChange>>,

    /// A map of change annotations that can be referenced in `AnnotatedTextEdit`s or create, rename and
    /// delete file / folder operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_annotations: Option<HashMap<ChangeAnnotationIdentifier, ChangeAnnotation>>,
}

impl WorkspaceEdit {
    /// A workspace edit made of ordered document changes.
    pub fn from_document_changes(changes: Vec<DocumentChange>) -> Self {
        Self {
            document_changes: Some(changes),
            ..Self::default()
        }
    }

    /// Whether the edit contains any create, rename or delete operation.
    pub fn has_resource_operations(&self) -> bool {
        self.document_changes.as_ref().map_or(false, |changes| {
            changes
                .iter()
                .any(|change| matches!(change, DocumentChange::ResourceOperation(_)))
        })
    }
}

/// Document change type for workspace edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentChange {
    TextDocumentEdit(TextDocumentEdit),
    ResourceOperation(ResourceOperation),
}

impl From<TextDocumentEdit> for DocumentChange {
    fn from(edit: TextDocumentEdit) -> Self {
        DocumentChange::TextDocumentEdit(edit)
    }
}

impl From<ResourceOperation> for DocumentChange {
    fn from(op: ResourceOperation) -> Self {
        DocumentChange::ResourceOperation(op)
    }
}

/// A text document identifier where the version is optional.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionalVersionedTextDocumentIdentifier {
    /// The text document's URI.
    pub uri: DocumentUri,
    /// The version number of this document. `null` means the version is
    /// unknown and the content in the store is the truth.
    pub version: Option<i32>,
}

impl OptionalVersionedTextDocumentIdentifier {
    /// Create a new optional versioned text document identifier.
    pub fn new(uri: impl Into<DocumentUri>, version: Option<i32>) -> Self {
        Self {
            uri: uri.into(),
            version,
        }
    }
}

/// The kind of resource operations supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceOperationKind {
    /// Supports creating new files and folders.
    Create,
    /// Supports renaming existing files and folders.
    Rename,
    /// Supports deleting existing files and folders.
    Delete,
}

/// The failure handling strategy for workspace edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureHandlingKind {
    /// Applying the workspace change is simply aborted if one of the changes
    /// provided fails. All operations executed before the failing operation
    /// stay executed.
    Abort,
    /// All operations are executed transactionally. That means they either all
    /// succeed or no changes at all are applied to the workspace.
    #[default]
    Transactional,
    /// If the workspace edit contains only textual file changes they are executed
    /// transactionally. If resource changes (create, rename or delete file) are part
    /// of the change the failure handling strategy is abort.
    TextOnlyTransactional,
    /// The client tries to undo the operations already executed. But there is no
    /// guarantee that this is succeeding.
    Undo,
}
