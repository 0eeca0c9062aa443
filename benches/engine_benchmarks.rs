//! Benchmarks for the protocol engine
//!
//! Covers message classification, request correlation and text edit
//! application, the three hot paths of a busy session.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lsp_engine::config::UndoRetention;
use lsp_engine::pending::CorrelationTable;
use lsp_engine::types::*;
use lsp_engine::workspace::{apply_text_edits, MemoryDocumentStore, WorkspaceEditApplier};
use serde_json::json;
use tokio::runtime::Runtime;

/// Benchmark decoding of inbound messages into their kind
fn bench_message_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_decoding");

    let messages = vec![
        (
            "request",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "client/registerCapability",
                "params": {"registrations": [{"id": "r1", "method": "textDocument/didSave"}]}
            })
            .to_string(),
        ),
        (
            "notification",
            json!({
                "jsonrpc": "2.0",
                "method": "$/progress",
                "params": {"token": "t", "value": {"kind": "report", "percentage": 50}}
            })
            .to_string(),
        ),
        (
            "response",
            json!({"jsonrpc": "2.0", "id": 7, "result": {"applied": true}}).to_string(),
        ),
        ("malformed", r#"{"jsonrpc":"2.0","id":7}"#.to_string()),
    ];

    for (kind, message) in messages {
        group.bench_with_input(BenchmarkId::new("decode", kind), &message, |b, msg| {
            b.iter(|| {
                let _ = RpcMessage::decode(black_box(msg));
            });
        });
    }

    group.finish();
}

/// Benchmark allocate/resolve cycles on the correlation table
fn bench_correlation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("correlation");

    for outstanding in [1usize, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("allocate_resolve", outstanding),
            &outstanding,
            |b, &outstanding| {
                b.iter(|| {
                    rt.block_on(async {
                        let table = CorrelationTable::default();
                        let mut calls = Vec::with_capacity(outstanding);
                        for _ in 0..outstanding {
                            calls.push(table.allocate("bench/method").await);
                        }
                        for (id, pending) in calls.into_iter().rev() {
                            table.resolve(&id, json!(null)).await.unwrap();
                            let _ = pending.await;
                        }
                    })
                });
            },
        );
    }

    group.finish();
}

fn document(lines: usize) -> String {
    (0..lines)
        .map(|n| format!("let value_{} = compute({});\n", n, n))
        .collect()
}

/// Benchmark applying text edits to documents of different sizes
fn bench_text_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_edits");

    for lines in [100usize, 1_000, 10_000] {
        let text = document(lines);
        let edits: Vec<AnyTextEdit> = (0..lines)
            .step_by(10)
            .map(|line| {
                TextEdit::replace(
                    Range::from_coords(line as u32, 4, line as u32, 9),
                    "renamed",
                )
                .into()
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::new("apply_text_edits", lines),
            &(text, edits),
            |b, (text, edits)| {
                b.iter(|| apply_text_edits(black_box(text), black_box(edits)).unwrap());
            },
        );
    }

    group.finish();
}

/// Benchmark a full transactional workspace edit over many documents
fn bench_workspace_edit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("workspace_edit");

    for documents in [1usize, 10, 100] {
        let store = (0..documents).fold(MemoryDocumentStore::new(), |store, n| {
            store.with_document(format!("file:///src/{}.rs", n), document(50), 1)
        });
        let edit = WorkspaceEdit::from_document_changes(
            (0..documents)
                .map(|n| {
                    TextDocumentEdit::new(
                        OptionalVersionedTextDocumentIdentifier::new(
                            format!("file:///src/{}.rs", n),
                            None,
                        ),
                        vec![TextEdit::insert(Position::new(0, 0), "// edited\n")],
                    )
                    .into()
                })
                .collect(),
        );

        group.bench_with_input(
            BenchmarkId::new("transactional", documents),
            &edit,
            |b, edit| {
                b.iter(|| {
                    rt.block_on(async {
                        let applier =
                            WorkspaceEditApplier::new(store.clone(), UndoRetention::default());
                        applier
                            .apply(black_box(edit), FailureHandlingKind::Transactional)
                            .await
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_message_decoding,
    bench_correlation,
    bench_text_edits,
    bench_workspace_edit
);
criterion_main!(benches);
