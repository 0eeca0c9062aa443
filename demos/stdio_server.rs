//! Minimal language server over stdio
//!
//! This example serves `initialize`/`shutdown`, registers for `didSave`
//! dynamically once the client is initialized, and answers a custom
//! `demo/insertHeader` request by asking the client to apply an edit.
//!
//! Run it under any LSP client, or pipe framed JSON-RPC into it:
//!
//! ```text
//! cargo run --example stdio_server
//! ```

use lsp_engine::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct InsertHeaderParams {
    uri: DocumentUri,
    #[serde(default)]
    version: Option<i32>,
}

async fn insert_header(
    params: InsertHeaderParams,
    ctx: RequestContext,
) -> std::result::Result<ApplyWorkspaceEditResult, ResponseError> {
    let edit = WorkspaceEdit::from_document_changes(vec![TextDocumentEdit::new(
        OptionalVersionedTextDocumentIdentifier::new(params.uri, params.version),
        vec![TextEdit::insert(Position::start(), "// Generated header\n")],
    )
    .into()]);

    ctx.peer()
        .apply_edit(ApplyWorkspaceEditParams {
            label: Some("Insert header".to_string()),
            edit,
        })
        .await
        .map_err(|e| e.to_response_error())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::default()
        .with_lifecycle(true)
        .with_request_timeout(std::time::Duration::from_secs(30));

    let dispatcher = Dispatcher::new()
        .on_request("initialize", |_params: Value, _ctx| async move {
            Ok::<_, ResponseError>(json!({
                "capabilities": {"textDocumentSync": 1},
                "serverInfo": {"name": "lsp-engine demo", "version": env!("CARGO_PKG_VERSION")}
            }))
        })
        .on_request("demo/insertHeader", insert_header)
        .on_notification("initialized", |_params: Value, peer: Peer| async move {
            tokio::spawn(async move {
                let registration = Registration::with_options(
                    "demo-did-save",
                    "textDocument/didSave",
                    json!({"includeText": false}),
                );
                match peer.register_capability(vec![registration]).await {
                    Ok(()) => eprintln!("registered textDocument/didSave"),
                    Err(e) => eprintln!("client refused registration: {}", e),
                }
            });
            Ok::<_, ResponseError>(())
        })
        .on_notification_gated("textDocument/didSave", |params: Value, _peer| async move {
            eprintln!("saved: {}", params["textDocument"]["uri"]);
            Ok::<_, ResponseError>(())
        });

    eprintln!("lsp-engine demo server listening on stdio");
    let connection = Connection::new(tokio::io::stdin(), tokio::io::stdout(), dispatcher, config);
    connection.closed().await;
    eprintln!("connection closed");
    Ok(())
}
