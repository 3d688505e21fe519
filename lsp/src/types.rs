//! Public types consumed by hosts of the bridge.
//!
//! A host constructs a [`crate::LifecycleController`], receives
//! [`ClientEvent`]s and [`Notice`]s from it, and reads diagnostics
//! snapshots for display.

use std::sync::{Arc, Mutex};

use url::Url;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from the wire encoding (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the protocol-defined range;
    /// the boundary decides the fallback policy.
    #[must_use]
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic reported by the server, in editor-facing form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
    /// 0-indexed line number.
    pub line: u32,
    /// 0-indexed column.
    pub col: u32,
    pub source: Option<String>,
}

impl Diagnostic {
    /// Format as `uri:line:col: severity: message` (1-indexed for display).
    #[must_use]
    pub fn display_with_uri(&self, uri: &Url) -> String {
        format!(
            "{}:{}:{}: {}: {}",
            uri,
            self.line + 1,
            self.col + 1,
            self.severity.label(),
            self.message,
        )
    }
}

/// Why a running session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The server closed its output cleanly.
    Exited,
    /// The transport failed.
    Failed(String),
}

/// An event emitted by a running session.
#[derive(Debug)]
pub enum ClientEvent {
    /// Diagnostics published for a document (after middleware filtering).
    Diagnostics { uri: Url, items: Vec<Diagnostic> },
    /// The session ended on its own.
    Stopped { reason: StopReason },
    /// The handshake reported no usable capabilities.
    MissingCapabilities,
}

/// Outcome of a `start` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Declined to start: the server is disabled or has no executable path.
    NotStarted,
}

/// A user-facing prompt asking to restart the server after a settings change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPrompt {
    pub message: String,
    /// Label of the action button; accepting it means "invoke restart".
    pub button: String,
}

/// A one-shot user-facing notice queued by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Error(String),
}

/// Selects documents the client is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFilter {
    pub scheme: String,
    pub language: String,
}

impl DocumentFilter {
    #[must_use]
    pub fn new(scheme: &str, language: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            language: language.to_string(),
        }
    }

    #[must_use]
    pub fn matches(&self, scheme: &str, language: &str) -> bool {
        self.scheme == scheme && self.language == language
    }
}

/// Named log-line sink standing in for the editor's output channel.
///
/// Cloning shares the underlying buffer: the controller creates one
/// channel and every rebuilt client appends to it, so log history
/// survives a restart.
#[derive(Debug, Clone)]
pub struct OutputChannel {
    name: Arc<str>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputChannel {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(channel = %self.name, "{line}");
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    /// Snapshot of all lines appended so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|lines| lines.clone()).unwrap_or_default()
    }
}
