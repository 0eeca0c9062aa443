//! Unit tests for the wire types
//!
//! This module tests JSON-RPC envelope classification, edit and registration
//! payload serialization, and the error code taxonomy.

mod common;

use common::*;
use lsp_engine::error::{error_codes, ErrorCode, ResponseError};
use lsp_engine::types::*;
use serde_json::json;

#[test]
fn test_ids_keep_their_wire_form() {
    for (id, wire) in [
        (Id::from(42i64), json!(42)),
        (Id::from("req-7"), json!("req-7")),
    ] {
        assert_eq!(serde_json::to_value(&id).unwrap(), wire);
        assert_eq!(serde_json::from_value::<Id>(wire).unwrap(), id);
    }
    assert_eq!(Id::Number(42).to_string(), "42");
    assert!(serde_json::from_value::<Id>(json!(1.5)).is_err());
}

#[test]
fn test_range_semantics() {
    let range = Range::from_coords(1, 5, 2, 10);
    assert_eq!(
        serde_json::to_value(range).unwrap(),
        json!({"start": {"line": 1, "character": 5}, "end": {"line": 2, "character": 10}})
    );
    assert!(range.contains(Position::new(2, 5)));
    // End is exclusive
    assert!(!range.contains(Position::new(2, 10)));
    assert!(Range::new(Position::start(), Position::start()).is_empty());
    assert!(Position::new(0, 9) < Position::new(1, 0));
}

#[test]
fn test_workspace_edit_with_changes_map() {
    let edit: WorkspaceEdit = serde_json::from_value(json!({
        "changes": {
            "file:///a.txt": [
                {"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 5}}, "newText": "hello"}
            ]
        }
    }))
    .unwrap();

    let changes = edit.changes.as_ref().unwrap();
    assert_eq!(changes["file:///a.txt"][0].range, test_range());
    assert!(edit.document_changes.is_none());
    assert!(!edit.has_resource_operations());
}

#[test]
fn test_resource_operation_wire_shape() {
    let mut create = CreateFile::new("file:///new.txt");
    create.options = Some(CreateFileOptions {
        overwrite: None,
        ignore_if_exists: Some(true),
    });
    let json = serde_json::to_value(ResourceOperation::Create(create)).unwrap();
    assert_eq!(
        json,
        json!({"kind": "create", "uri": "file:///new.txt", "options": {"ignoreIfExists": true}})
    );

    let delete: ResourceOperation = serde_json::from_value(json!({
        "kind": "delete",
        "uri": "file:///dir",
        "options": {"recursive": true},
        "annotationId": "cleanup"
    }))
    .unwrap();
    assert_eq!(delete.kind(), ResourceOperationKind::Delete);
    assert_eq!(delete.annotation_id(), Some("cleanup"));
}

#[test]
fn test_registration_params() {
    let params = RegistrationParams {
        registrations: vec![Registration::with_options(
            "reg-1",
            "textDocument/didSave",
            json!({"includeText": true}),
        )],
    };
    let json = serde_json::to_value(&params).unwrap();
    assert_eq!(json["registrations"][0]["registerOptions"]["includeText"], true);

    let unregister: UnregistrationParams = serde_json::from_value(json!({
        "unregisterations": [{"id": "reg-1", "method": "textDocument/didSave"}]
    }))
    .unwrap();
    assert_eq!(
        unregister.unregistrations[0],
        Unregistration::from(&params.registrations[0])
    );
}

#[test]
fn test_apply_edit_payloads() {
    let params: ApplyWorkspaceEditParams = serde_json::from_value(json!({
        "label": "Rename",
        "edit": {"documentChanges": [
            {"kind": "rename", "oldUri": "file:///a.txt", "newUri": "file:///b.txt"}
        ]}
    }))
    .unwrap();
    assert_eq!(params.label.as_deref(), Some("Rename"));
    assert!(params.edit.has_resource_operations());

    let result = ApplyWorkspaceEditResult {
        applied: false,
        failure_reason: Some("document not found: file:///a.txt".to_string()),
        failed_change: Some(0),
    };
    assert_json_eq(
        r#"{"applied":false,"failureReason":"document not found: file:///a.txt","failedChange":0}"#,
        &serde_json::to_string(&result).unwrap(),
    );
}

#[test]
fn test_error_code_taxonomy() {
    let codes = [
        (ErrorCode::ParseError, -32700),
        (ErrorCode::InvalidRequest, -32600),
        (ErrorCode::MethodNotFound, -32601),
        (ErrorCode::InvalidParams, -32602),
        (ErrorCode::InternalError, -32603),
        (ErrorCode::ServerNotInitialized, -32002),
        (ErrorCode::UnknownErrorCode, -32001),
        (ErrorCode::RequestCancelled, -32800),
        (ErrorCode::ContentModified, -32801),
        (ErrorCode::MessageWriteError, -32099),
        (ErrorCode::MessageReadError, -32098),
        (ErrorCode::RequestTimeout, -32097),
        (ErrorCode::ConnectionClosed, -32096),
    ];
    for (kind, code) in codes {
        assert_eq!(kind.code(), code);
        assert_eq!(ErrorCode::from_code(code), kind);
    }
    assert_eq!(ErrorCode::from_code(-1), ErrorCode::UnknownErrorCode);
    assert_eq!(
        ResponseError::method_not_found("x").kind(),
        ErrorCode::MethodNotFound
    );
}

#[test]
fn test_envelopes_serialize_to_wire_form() {
    let cases = [
        (
            RpcMessage::Request(RequestMessage::new(Id::Number(1), "test/method")),
            json!({"jsonrpc": "2.0", "id": 1, "method": "test/method"}),
        ),
        (
            RpcMessage::Notification(NotificationMessage::with_params(
                "test/notify",
                json!({"data": "test"}),
            )),
            json!({"jsonrpc": "2.0", "method": "test/notify", "params": {"data": "test"}}),
        ),
        (
            RpcMessage::Response(ResponseMessage::success(Id::from("req1"), json!(null))),
            json!({"jsonrpc": "2.0", "id": "req1", "result": null}),
        ),
        (
            RpcMessage::Response(ResponseMessage::error(
                None,
                ResponseError::parse_error("Invalid JSON"),
            )),
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Invalid JSON"}}),
        ),
    ];
    for (message, wire) in cases {
        assert_eq!(serde_json::to_value(&message).unwrap(), wire);
    }
}

#[test]
fn test_envelopes_are_classified_by_fields() {
    let request = RpcMessage::from_value(json!({
        "jsonrpc": "2.0", "id": "a", "method": "m", "params": [1, 2]
    }))
    .unwrap();
    assert!(matches!(request, RpcMessage::Request(ref r) if r.params == Some(json!([1, 2]))));
    assert_eq!(request.id(), Some(&Id::from("a")));

    let notification = RpcMessage::from_value(json!({"jsonrpc": "2.0", "method": "m"})).unwrap();
    assert!(matches!(notification, RpcMessage::Notification(_)));
    assert_eq!(notification.id(), None);

    let error = RpcMessage::from_value(json!({
        "jsonrpc": "2.0", "id": 2, "error": {"code": -32800, "message": "cancelled"}
    }))
    .unwrap();
    match error {
        RpcMessage::Response(response) => {
            assert_eq!(
                response.into_result().unwrap_err().kind(),
                ErrorCode::RequestCancelled
            );
        }
        other => panic!("expected a response, got {:?}", other),
    }
}

#[test]
fn test_malformed_envelopes() {
    let invalid_json = RpcMessage::decode("{not json").unwrap_err();
    assert_eq!(invalid_json.id, None);
    assert_eq!(invalid_json.error.code, error_codes::PARSE_ERROR);

    // An id is recovered so the error can be correlated
    let no_method = RpcMessage::decode(r#"{"jsonrpc":"2.0","id":7}"#).unwrap_err();
    assert_eq!(no_method.id, Some(Id::Number(7)));
    assert_eq!(no_method.error.code, error_codes::INVALID_REQUEST);

    let response = no_method.into_response();
    assert_eq!(response.id, Some(Id::Number(7)));
    assert!(response.is_error());
}
