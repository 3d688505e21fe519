//! The language client: process spawning, the framed session, and the
//! request/notification surface the controller drives.
//!
//! A [`LanguageClient`] is a buildable definition (command, args,
//! selector, middleware); [`RunningSession`] is one live connection to a
//! spawned server. The split lets the controller keep a definition
//! around across restarts and only respawn the process.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::middleware::Middleware;
use crate::protocol::{
    self, CompletionReply, Notification, PublishDiagnosticsParams, Request,
};
use crate::settings::LANGUAGE_ID;
use crate::transport::{MessageReader, MessageWriter};
use crate::types::{ClientEvent, DocumentFilter, OutputChannel, StopReason};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);
const OUTBOX_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum Outbox {
    Send(serde_json::Value),
    Close,
}

/// A buildable client definition, produced by the builder from a config
/// snapshot.
#[derive(Debug)]
pub(crate) struct LanguageClient {
    name: String,
    command: String,
    args: Vec<String>,
    document_selector: Vec<DocumentFilter>,
    watch: globset::GlobSet,
    middleware: Middleware,
    output: OutputChannel,
}

impl LanguageClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        command: String,
        args: Vec<String>,
        document_selector: Vec<DocumentFilter>,
        watch: globset::GlobSet,
        middleware: Middleware,
        output: OutputChannel,
    ) -> Self {
        Self {
            name,
            command,
            args,
            document_selector,
            watch,
            middleware,
            output,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn document_selector(&self) -> &[DocumentFilter] {
        &self.document_selector
    }

    /// Whether edits to this path should be forwarded to the server.
    pub fn is_watched(&self, path: &Path) -> bool {
        self.watch.is_match(path)
    }

    /// Spawn the server process and run the handshake over its stdio.
    pub async fn start(
        &self,
        workspace_root: &Path,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Result<RunningSession> {
        let resolved = which::which(&self.command)
            .with_context(|| format!("language server executable {:?} not found", self.command))?;

        let mut child = ProcessCommand::new(&resolved)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", resolved.display()))?;

        let stdin = child.stdin.take().context("child stdin not captured")?;
        let stdout = child.stdout.take().context("child stdout not captured")?;

        tracing::info!(server = %self.name, command = %resolved.display(), "Language server spawned");
        self.output
            .append(format!("Spawned {}", resolved.display()));

        self.establish(stdin, stdout, Some(child), workspace_root, event_tx)
            .await
    }

    /// Run the session over an arbitrary transport. Process stdio in
    /// production; an in-memory duplex in tests.
    pub async fn establish<W, R>(
        &self,
        write_half: W,
        read_half: R,
        child: Option<Child>,
        workspace_root: &Path,
        event_tx: mpsc::Sender<ClientEvent>,
    ) -> Result<RunningSession>
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(run_writer(write_half, outbox_rx));
        let reader = tokio::spawn(run_reader(
            read_half,
            Arc::clone(&pending),
            outbox_tx.clone(),
            self.middleware.clone(),
            event_tx.clone(),
        ));

        let mut session = RunningSession {
            name: self.name.clone(),
            child,
            outbox_tx,
            next_id: 0,
            pending,
            middleware: self.middleware.clone(),
            doc_versions: HashMap::new(),
            capabilities: serde_json::Value::Null,
            reader,
            writer,
        };

        let root_uri = protocol::path_to_uri(workspace_root)
            .map(|uri| uri.to_string())
            .unwrap_or_else(|_| format!("file://{}", workspace_root.display()));

        let reply = session
            .request("initialize", Some(protocol::initialize_params(&root_uri)))
            .await
            .context("initialize handshake failed")?;
        session.capabilities = reply
            .get("capabilities")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        session
            .notify("initialized", Some(serde_json::json!({})))
            .await?;

        if session.capabilities_missing() {
            tracing::warn!(server = %self.name, "Server reported no capabilities");
            event_tx.send(ClientEvent::MissingCapabilities).await.ok();
        }

        Ok(session)
    }
}

/// One live connection to a spawned server.
pub(crate) struct RunningSession {
    name: String,
    child: Option<Child>,
    outbox_tx: mpsc::Sender<Outbox>,
    next_id: u64,
    pending: PendingMap,
    middleware: Middleware,
    /// Document version per URI; presence means the document was opened.
    doc_versions: HashMap<String, i32>,
    capabilities: serde_json::Value,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RunningSession {
    /// Whether the handshake yielded no usable capabilities.
    pub fn capabilities_missing(&self) -> bool {
        match &self.capabilities {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    async fn request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.next_id += 1;
        let id = self.next_id;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::to_value(Request::new(id, method, params))
            .context("encoding request")?;
        if self.outbox_tx.send(Outbox::Send(frame)).await.is_err() {
            self.pending.lock().await.remove(&id);
            bail!("session closed while sending {method}");
        }

        let reply = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                bail!("session closed while awaiting {method} reply");
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                bail!("{method} request timed out");
            }
        };

        if let Some(error) = reply.get("error") {
            bail!("server rejected {method}: {error}");
        }
        Ok(reply.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn notify(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<()> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .context("encoding notification")?;
        self.outbox_tx
            .send(Outbox::Send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("session closed while sending {method}"))
    }

    /// Synchronize a document edit: `didOpen` on first sight, then
    /// `didChange` with a climbing version number.
    pub async fn notify_document_changed(&mut self, uri: &url::Url, text: &str) -> Result<()> {
        let key = protocol::uri_to_wire(uri);
        match self.doc_versions.get_mut(&key) {
            None => {
                self.doc_versions.insert(key.clone(), 1);
                self.notify(
                    "textDocument/didOpen",
                    Some(protocol::did_open_params(&key, LANGUAGE_ID, 1, text)),
                )
                .await
            }
            Some(version) => {
                *version += 1;
                let version = *version;
                self.notify(
                    "textDocument/didChange",
                    Some(protocol::did_change_params(&key, version, text)),
                )
                .await
            }
        }
    }

    /// Request completions at a position, through the middleware.
    pub async fn completion(
        &mut self,
        uri: &url::Url,
        line: u32,
        character: u32,
    ) -> Result<Option<CompletionReply>> {
        let middleware = self.middleware.clone();
        let uri = protocol::uri_to_wire(uri);
        middleware
            .provide_completion_items(|| async move {
                let reply = self
                    .request(
                        "textDocument/completion",
                        Some(protocol::completion_params(&uri, line, character)),
                    )
                    .await?;
                if reply.is_null() {
                    return Ok(None);
                }
                serde_json::from_value(reply)
                    .context("parsing completion reply")
                    .map(Some)
            })
            .await
    }

    /// Request document links, through the middleware.
    pub async fn document_links(&mut self, uri: &url::Url) -> Result<Option<serde_json::Value>> {
        let middleware = self.middleware.clone();
        let uri = protocol::uri_to_wire(uri);
        middleware
            .provide_document_links(|| async move {
                let reply = self
                    .request(
                        "textDocument/documentLink",
                        Some(protocol::document_link_params(&uri)),
                    )
                    .await?;
                Ok((!reply.is_null()).then_some(reply))
            })
            .await
    }

    /// Orderly teardown: `shutdown` request, `exit` notification, then a
    /// bounded wait before killing the process.
    pub async fn shutdown(mut self) {
        if let Err(err) =
            tokio::time::timeout(SHUTDOWN_WAIT, self.request("shutdown", None)).await
        {
            tracing::debug!(server = %self.name, "Shutdown request not acknowledged: {err}");
        }
        if let Err(err) = self.notify("exit", None).await {
            tracing::debug!(server = %self.name, "Exit notification failed: {err}");
        }

        self.outbox_tx.send(Outbox::Close).await.ok();
        self.writer.await.ok();

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_WAIT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(server = %self.name, %status, "Language server exited");
                }
                Ok(Err(err)) => {
                    tracing::warn!(server = %self.name, "Failed to reap language server: {err}");
                }
                Err(_) => {
                    tracing::warn!(server = %self.name, "Language server did not exit, killing");
                    child.kill().await.ok();
                }
            }
        }

        // Wait the reader out so its final event, if any, is already
        // queued when this returns.
        self.reader.abort();
        self.reader.await.ok();
    }
}

async fn run_writer<W: AsyncWrite + Unpin>(write_half: W, mut outbox_rx: mpsc::Receiver<Outbox>) {
    let mut writer = MessageWriter::new(write_half);
    while let Some(item) = outbox_rx.recv().await {
        match item {
            Outbox::Send(frame) => {
                if let Err(err) = writer.write(&frame).await {
                    tracing::warn!("Failed to write to language server: {err}");
                    break;
                }
            }
            Outbox::Close => break,
        }
    }
}

async fn run_reader<R: AsyncRead + Unpin>(
    read_half: R,
    pending: PendingMap,
    outbox_tx: mpsc::Sender<Outbox>,
    middleware: Middleware,
    event_tx: mpsc::Sender<ClientEvent>,
) {
    let mut reader = MessageReader::new(read_half);
    let reason = loop {
        match reader.read().await {
            Ok(Some(frame)) => {
                dispatch(frame, &pending, &outbox_tx, &middleware, &event_tx).await;
            }
            Ok(None) => break StopReason::Exited,
            Err(err) => break StopReason::Failed(err.to_string()),
        }
    };
    event_tx.send(ClientEvent::Stopped { reason }).await.ok();
}

async fn dispatch(
    frame: serde_json::Value,
    pending: &PendingMap,
    outbox_tx: &mpsc::Sender<Outbox>,
    middleware: &Middleware,
    event_tx: &mpsc::Sender<ClientEvent>,
) {
    let method = frame.get("method").and_then(serde_json::Value::as_str);
    let id = frame.get("id").cloned();

    match (method, id) {
        // Server-initiated request: nothing is supported, decline.
        (Some(method), Some(id)) => {
            tracing::debug!(method, "Declining server request");
            let reply = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "method not found" }
            });
            outbox_tx.send(Outbox::Send(reply)).await.ok();
        }
        (Some("textDocument/publishDiagnostics"), None) => {
            let Some(params) = frame.get("params").cloned() else {
                return;
            };
            handle_diagnostics(params, middleware, event_tx).await;
        }
        (Some(method), None) => {
            tracing::debug!(method, "Ignoring server notification");
        }
        (None, Some(id)) => {
            let Some(id) = id.as_u64() else {
                tracing::warn!("Response with non-numeric id");
                return;
            };
            match pending.lock().await.remove(&id) {
                Some(tx) => {
                    tx.send(frame).ok();
                }
                None => tracing::warn!(id, "Response for unknown request"),
            }
        }
        (None, None) => tracing::warn!("Frame with neither method nor id"),
    }
}

async fn handle_diagnostics(
    params: serde_json::Value,
    middleware: &Middleware,
    event_tx: &mpsc::Sender<ClientEvent>,
) {
    let params: PublishDiagnosticsParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(err) => {
            tracing::warn!("Malformed diagnostics publication: {err}");
            return;
        }
    };

    let Some(params) = middleware.handle_diagnostics(params) else {
        return;
    };

    let uri = match protocol::parse_server_uri(&params.uri) {
        Ok(uri) => uri,
        Err(err) => {
            tracing::warn!("Dropping diagnostics: {err}");
            return;
        }
    };

    let items = params.diagnostics.iter().map(|d| d.to_diagnostic()).collect();
    event_tx
        .send(ClientEvent::Diagnostics { uri, items })
        .await
        .ok();
}
