//! Session lifecycle: start, restart, settings-change handling, and the
//! event pump feeding the diagnostics collection.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::sync::mpsc;

use crate::builder::{self, build_client};
use crate::client::{LanguageClient, RunningSession};
use crate::diagnostics::{DiagnosticsCollection, DiagnosticsSnapshot};
use crate::protocol::{self, CompletionReply};
use crate::settings::{
    LANGUAGE_ID, SERVER_NAME, SETTINGS_NAMESPACE, ServerConfig, Settings, SettingsChange, keys,
};
use crate::types::{ClientEvent, Notice, OutputChannel, RestartPrompt, StartOutcome, StopReason};

const EVENT_CAPACITY: usize = 256;

const NO_CAPABILITIES_MSG: &str =
    "The language server is not able to serve any features at the moment.";

/// How a session gets a transport: a spawned process in production, an
/// in-memory fake in tests.
enum Connector {
    Process,
    #[cfg(test)]
    Test(crate::test_support::FakeConnector),
}

/// Owns the client definition, the running session, and everything the
/// host reads back: diagnostics, log output, and queued notices.
///
/// State is carried as location: `session.is_some()` means running, and
/// a session that dies is simply removed during the next event pump.
pub struct LifecycleController {
    client: Option<LanguageClient>,
    session: Option<RunningSession>,
    /// The config snapshot the current `client` was built from. The
    /// client is rebuilt only when a new snapshot differs structurally.
    latest_config: Option<ServerConfig>,
    diagnostics: DiagnosticsCollection,
    output: OutputChannel,
    notices: VecDeque<Notice>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: mpsc::Receiver<ClientEvent>,
    settings_path: PathBuf,
    install_dir: PathBuf,
    workspace_root: PathBuf,
    param_hints: bool,
    builds: u64,
    connector: Connector,
}

impl LifecycleController {
    #[must_use]
    pub fn new(settings_path: PathBuf, install_dir: PathBuf, workspace_root: PathBuf) -> Self {
        Self::with_connector(settings_path, install_dir, workspace_root, Connector::Process)
    }

    fn with_connector(
        settings_path: PathBuf,
        install_dir: PathBuf,
        workspace_root: PathBuf,
        connector: Connector,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            client: None,
            session: None,
            latest_config: None,
            diagnostics: DiagnosticsCollection::new(builder::DIAGNOSTICS_COLLECTION),
            output: OutputChannel::new(SERVER_NAME),
            notices: VecDeque::new(),
            event_tx,
            event_rx,
            settings_path,
            install_dir,
            workspace_root,
            param_hints: true,
            builds: 0,
            connector,
        }
    }

    #[cfg(test)]
    fn for_test(
        settings_path: PathBuf,
        install_dir: PathBuf,
        workspace_root: PathBuf,
        fake: crate::test_support::FakeConnector,
    ) -> Self {
        Self::with_connector(
            settings_path,
            install_dir,
            workspace_root,
            Connector::Test(fake),
        )
    }

    /// Start (or decline to start) a session for the given config.
    ///
    /// Any running session is shut down first. The client definition is
    /// rebuilt only when the config snapshot differs from the one the
    /// current definition was built from.
    pub async fn start(&mut self, config: ServerConfig) -> Result<StartOutcome> {
        self.stop_session().await;

        if self.latest_config.as_ref() != Some(&config) {
            if !config.enabled || config.executable_path.is_empty() {
                tracing::info!(server = %config.server_name, "Language server disabled");
                self.latest_config = Some(config);
                self.client = None;
                return Ok(StartOutcome::NotStarted);
            }
            let client = build_client(&config, self.param_hints, self.output.clone())?;
            self.latest_config = Some(config);
            self.client = Some(client);
            self.builds += 1;
            tracing::debug!(builds = self.builds, "Built language client");
        }

        let Some(client) = &self.client else {
            return Ok(StartOutcome::NotStarted);
        };

        let session = match &self.connector {
            Connector::Process => {
                client
                    .start(&self.workspace_root, self.event_tx.clone())
                    .await?
            }
            #[cfg(test)]
            Connector::Test(fake) => {
                fake.connect(client, &self.workspace_root, self.event_tx.clone())
                    .await?
            }
        };

        self.session = Some(session);
        tracing::info!(
            server = %client.name(),
            command = %client.command(),
            args = ?client.args(),
            "Language server session established"
        );
        Ok(StartOutcome::Started)
    }

    /// Re-read settings from disk and start against the fresh config.
    pub async fn restart(&mut self) -> Result<StartOutcome> {
        let settings = Settings::load(&self.settings_path)?;

        let param_hints = settings.parameter_hints_enabled();
        if param_hints != self.param_hints {
            // Hints are baked into the middleware; force a rebuild.
            self.param_hints = param_hints;
            self.latest_config = None;
        }

        let config = settings.server_config(&self.install_dir);
        self.start(config).await
    }

    /// React to a settings change: decide whether the user should be
    /// prompted to restart, and with what wording.
    ///
    /// Returns `None` when nothing under the server's namespace changed.
    /// The enable-toggle rule decides the button label; a later match on
    /// the server invocation keys replaces only the message.
    #[must_use]
    pub fn on_configuration_changed(
        &self,
        change: &SettingsChange,
        new: &Settings,
    ) -> Option<RestartPrompt> {
        if !change.affects(SETTINGS_NAMESPACE) {
            return None;
        }

        let mut message = None;
        let mut button = "Restart".to_string();

        if change.affects(keys::USE_LANGUAGE_SERVER) {
            if new.noverify.use_language_server {
                message = Some("Start NoVerify to enable the use of language server".to_string());
                button = "Start".to_string();
            } else {
                message = Some("Stop NoVerify to disable the use of language server".to_string());
                button = "Stop".to_string();
            }
        }

        if change.affects(keys::NOVERIFY_PATH)
            || change.affects(keys::PHP_STUBS_PATH)
            || change.affects(keys::NOVERIFY_EXTRA_ARGS)
        {
            message = Some(
                "Restart NoVerify for the changes in language server settings to take effect"
                    .to_string(),
            );
        }

        message.map(|message| RestartPrompt { message, button })
    }

    /// Drain up to `budget` queued session events. Returns how many were
    /// handled.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut handled = 0;
        while handled < budget {
            let Ok(event) = self.event_rx.try_recv() else {
                break;
            };
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Diagnostics { uri, items } => {
                tracing::debug!(
                    collection = %self.diagnostics.name(),
                    uri = %uri,
                    count = items.len(),
                    "Diagnostics updated"
                );
                self.diagnostics.update(uri, items);
            }
            ClientEvent::Stopped { reason } => {
                match &reason {
                    StopReason::Exited => {
                        tracing::info!("Language server stopped");
                        self.output.append("Language server stopped");
                    }
                    StopReason::Failed(err) => {
                        tracing::warn!("Language server connection failed: {err}");
                        self.output
                            .append(format!("Language server connection failed: {err}"));
                    }
                }
                self.session = None;
            }
            ClientEvent::MissingCapabilities => {
                self.notices
                    .push_back(Notice::Error(NO_CAPABILITIES_MSG.to_string()));
            }
        }
    }

    /// Forward a document edit to the server, if one is running and the
    /// document is a PHP file the client watches.
    pub async fn notify_document_changed(&mut self, path: &Path, text: &str) -> Result<()> {
        let (Some(client), Some(session)) = (&self.client, &mut self.session) else {
            return Ok(());
        };
        let selected = client
            .document_selector()
            .iter()
            .any(|f| f.matches("file", LANGUAGE_ID));
        if !selected || !client.is_watched(path) {
            return Ok(());
        }
        let uri = protocol::path_to_uri(path)?;
        session.notify_document_changed(&uri, text).await
    }

    /// Request completions at a position in a file.
    pub async fn completion(
        &mut self,
        path: &Path,
        line: u32,
        character: u32,
    ) -> Result<Option<CompletionReply>> {
        let Some(session) = &mut self.session else {
            return Ok(None);
        };
        let uri = protocol::path_to_uri(path)?;
        session.completion(&uri, line, character).await
    }

    /// Request document links for a file.
    pub async fn document_links(&mut self, path: &Path) -> Result<Option<serde_json::Value>> {
        let Some(session) = &mut self.session else {
            return Ok(None);
        };
        let uri = protocol::path_to_uri(path)?;
        session.document_links(&uri).await
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Pop the oldest queued notice, if any.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notices.pop_front()
    }

    #[must_use]
    pub fn output(&self) -> &OutputChannel {
        &self.output
    }

    /// Stop the running session, keeping the client definition around
    /// for reuse.
    pub async fn shutdown(&mut self) {
        self.stop_session().await;
    }

    async fn stop_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.diagnostics.clear();
        session.shutdown().await;
        // The dead session's final events are already queued; drop them
        // so they cannot be mistaken for the next session's.
        while self.event_rx.try_recv().is_ok() {}
    }

    #[cfg(test)]
    fn builds(&self) -> u64 {
        self.builds
    }
}
