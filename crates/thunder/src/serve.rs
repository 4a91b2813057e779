// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `thunder serve` command implementation.
//!
//! Starts the database service and answers one JSON request per stdin line
//! with one JSON response per stdout line. Requests are handled in the order
//! they arrive; logging goes to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use thunder_config::ThunderConfig;
use thunder_core::ThunderError;
use thunder_worker::{DatabaseService, Router};

/// Runs the worker until stdin closes, then closes every connection.
pub async fn run_serve(config: ThunderConfig) -> Result<(), ThunderError> {
    init_tracing(&config.worker.log_level);

    info!(
        backend = %config.storage.backend,
        vfs = %config.vfs.name,
        "starting thunder serve"
    );
    let service = Arc::new(DatabaseService::start(&config).await?);
    let router = Router::new(Arc::clone(&service));

    let served = serve_lines(&router, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await;
    let closed = service.shutdown().await;
    match &served {
        Ok(count) => info!(requests = count, "stdin closed, worker stopped"),
        Err(e) => warn!(error = %e, "request stream failed"),
    }
    served?;
    closed
}

/// Answers every non-blank line of `reader` on `writer`, in order.
///
/// Returns the number of requests answered.
pub async fn serve_lines<R, W>(router: &Router, reader: R, mut writer: W) -> Result<usize, ThunderError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await.map_err(stdio_error)? {
        if line.trim().is_empty() {
            continue;
        }
        let response = router.handle_line(&line).await;
        let mut out = serde_json::to_vec(&response)
            .map_err(|e| ThunderError::Internal(format!("cannot encode response: {e}")))?;
        out.push(b'\n');
        writer.write_all(&out).await.map_err(stdio_error)?;
        writer.flush().await.map_err(stdio_error)?;
        count += 1;
    }
    Ok(count)
}

fn stdio_error(e: std::io::Error) -> ThunderError {
    ThunderError::Internal(format!("stdio: {e}"))
}

/// Initializes the tracing subscriber with the given log level.
///
/// Stdout carries responses, so logs are written to stderr.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("thunder={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use thunder_test_utils::TestWorker;

    use super::*;

    async fn exchange(worker: &TestWorker, input: &str) -> Vec<Value> {
        let mut out = Vec::new();
        serve_lines(&worker.router, input.as_bytes(), &mut out)
            .await
            .unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn one_response_per_request_in_order() {
        let worker = TestWorker::in_memory().await.unwrap();
        let input = concat!(
            r#"{"id": 1, "method": "openDatabase", "arguments": {"path": "lines.db"}}"#,
            "\n\n",
            r#"{"id": 2, "method": "execute", "arguments": {"id": 1, "sql": "CREATE TABLE t (x)"}}"#,
            "\n",
            r#"{"id": 3, "method": "insert", "arguments": {"id": 1, "sql": "INSERT INTO t VALUES (7)"}}"#,
            "\n",
            r#"{"id": 4, "method": "query", "arguments": {"id": 1, "sql": "SELECT x FROM t"}}"#,
            "\n",
        );
        let responses = exchange(&worker, input).await;
        assert_eq!(
            responses,
            vec![
                json!({"id": 1, "result": {"id": 1}}),
                json!({"id": 2, "result": null}),
                json!({"id": 3, "result": {"id": 1}}),
                json!({"id": 4, "result": {"columns": ["x"], "rows": [[7]]}}),
            ]
        );
    }

    #[tokio::test]
    async fn bad_lines_get_error_responses() {
        let worker = TestWorker::in_memory().await.unwrap();
        let input = "not json\n{\"id\": 9, \"method\": \"vacuumEverything\"}\n";
        let responses = exchange(&worker, input).await;
        assert_eq!(responses.len(), 2);
        assert!(responses[0].get("error").is_some());
        assert_eq!(responses[1]["id"], json!(9));
        assert!(
            responses[1]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("vacuumEverything")
        );
    }

    #[tokio::test]
    async fn empty_input_answers_nothing() {
        let worker = TestWorker::in_memory().await.unwrap();
        let mut out = Vec::new();
        let count = serve_lines(&worker.router, &b""[..], &mut out).await.unwrap();
        assert_eq!(count, 0);
        assert!(out.is_empty());
    }
}
