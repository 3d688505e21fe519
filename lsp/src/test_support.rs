//! In-memory fake server for exercising sessions without a process.
//!
//! The fake speaks real framed JSON-RPC over a duplex pipe, records
//! every method it sees, and answers the handshake, so controller tests
//! cover the full client pipeline.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::client::{LanguageClient, RunningSession};
use crate::transport::{MessageReader, MessageWriter};
use crate::types::ClientEvent;

const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub(crate) struct FakeConnector {
    /// `connect:<command>` markers plus every method the fake received,
    /// in order.
    pub log: Arc<Mutex<Vec<String>>>,
    /// Value returned as `capabilities` from `initialize`.
    pub capabilities: serde_json::Value,
    /// Diagnostics params pushed right after `initialized` arrives.
    pub push_diagnostics: Option<serde_json::Value>,
    /// Result returned for `textDocument/completion`.
    pub completion_reply: Option<serde_json::Value>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            capabilities: serde_json::json!({
                "textDocumentSync": 1,
                "completionProvider": {}
            }),
            push_diagnostics: None,
            completion_reply: None,
        }
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub async fn connect(
        &self,
        client: &LanguageClient,
        workspace_root: &Path,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Result<RunningSession> {
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        self.log
            .lock()
            .unwrap()
            .push(format!("connect:{}", client.command()));

        tokio::spawn(run_fake_server(
            theirs,
            Arc::clone(&self.log),
            self.capabilities.clone(),
            self.push_diagnostics.clone(),
            self.completion_reply.clone(),
        ));

        let (read_half, write_half) = tokio::io::split(ours);
        client
            .establish(write_half, read_half, None, workspace_root, event_tx)
            .await
    }
}

async fn run_fake_server(
    stream: DuplexStream,
    log: Arc<Mutex<Vec<String>>>,
    capabilities: serde_json::Value,
    push_diagnostics: Option<serde_json::Value>,
    completion_reply: Option<serde_json::Value>,
) {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = MessageReader::new(read_half);
    let mut writer = MessageWriter::new(write_half);

    while let Ok(Some(frame)) = reader.read().await {
        let method = frame
            .get("method")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
            .to_string();
        if !method.is_empty() {
            log.lock().unwrap().push(method.clone());
        }

        if let Some(id) = frame.get("id").cloned() {
            let result = match method.as_str() {
                "initialize" => serde_json::json!({ "capabilities": capabilities }),
                "textDocument/completion" => {
                    completion_reply.clone().unwrap_or(serde_json::Value::Null)
                }
                _ => serde_json::Value::Null,
            };
            let reply = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result });
            if writer.write(&reply).await.is_err() {
                break;
            }
        }

        if method == "initialized"
            && let Some(params) = &push_diagnostics
        {
            let publication = serde_json::json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": params
            });
            if writer.write(&publication).await.is_err() {
                break;
            }
        }

        if method == "exit" {
            break;
        }
    }
}
