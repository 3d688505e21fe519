//! Editor-side bridge for the NoVerify PHP language server.
//!
//! The bridge spawns `noverify -lang-server`, speaks framed JSON-RPC
//! over its stdio, and exposes a [`LifecycleController`] that a host
//! drives: start and restart sessions from settings snapshots, forward
//! document edits, and read back diagnostics and notices.

mod builder;
mod client;
mod diagnostics;
mod lifecycle;
mod middleware;
mod protocol;
pub mod settings;
#[cfg(test)]
mod test_support;
mod transport;
pub mod types;

pub use builder::BuildError;
pub use diagnostics::DiagnosticsSnapshot;
pub use lifecycle::LifecycleController;
pub use protocol::{Command, CompletionItem, CompletionList, CompletionReply};
pub use settings::{ServerConfig, Settings, SettingsChange, SettingsError};
pub use types::{Diagnostic, DiagnosticSeverity, Notice, RestartPrompt, StartOutcome, StopReason};
