//! Request and notification interception between host and server.
//!
//! The middleware sits on the client pipeline and applies the feature
//! toggles from settings: disabled features are suppressed before they
//! reach the host, and completion replies are augmented with a
//! parameter-hint trigger command.

use crate::protocol::{Command, CompletionReply, PublishDiagnosticsParams};
use crate::settings::Features;

pub(crate) const PARAM_HINTS_TITLE: &str = "triggerParameterHints";
pub(crate) const PARAM_HINTS_COMMAND: &str = "editor.action.triggerParameterHints";

#[derive(Debug, Clone)]
pub(crate) struct Middleware {
    features: Features,
    param_hints: bool,
}

impl Middleware {
    pub fn new(features: Features, param_hints: bool) -> Self {
        Self {
            features,
            param_hints,
        }
    }

    /// Filter a diagnostics publication. `None` means the feature is
    /// disabled and the publication must be dropped entirely, as opposed
    /// to forwarded empty, which would clear previous results.
    pub fn handle_diagnostics(
        &self,
        params: PublishDiagnosticsParams,
    ) -> Option<PublishDiagnosticsParams> {
        self.features.diagnostics.then_some(params)
    }

    /// Run a document-link request through the pipeline. When the
    /// feature is disabled the server is never asked.
    pub async fn provide_document_links<F, Fut, T>(&self, next: F) -> anyhow::Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        if !self.features.document_link {
            return Ok(None);
        }
        next().await
    }

    /// Run a completion request through the pipeline and rewrite the
    /// reply's item commands.
    pub async fn provide_completion_items<F, Fut>(
        &self,
        next: F,
    ) -> anyhow::Result<Option<CompletionReply>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<CompletionReply>>>,
    {
        let mut reply = next().await?;
        if let Some(reply) = reply.as_mut() {
            self.attach_trigger_command(reply);
        }
        Ok(reply)
    }

    /// Overwrite the command on every item. When hints are enabled each
    /// item triggers parameter hints on accept; when disabled any
    /// server-assigned command is cleared.
    fn attach_trigger_command(&self, reply: &mut CompletionReply) {
        let command = self.param_hints.then(|| Command {
            title: PARAM_HINTS_TITLE.to_string(),
            command: PARAM_HINTS_COMMAND.to_string(),
        });
        for item in reply.items_mut() {
            item.command = command.clone();
        }
    }
}
