//! Turning a [`ServerConfig`] snapshot into a buildable client definition.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::client::LanguageClient;
use crate::middleware::Middleware;
use crate::settings::{LANGUAGE_ID, ServerConfig};
use crate::types::{DocumentFilter, OutputChannel};

const STUBS_DIR_FLAG: &str = "-stubs-dir";
const LANG_SERVER_FLAG: &str = "-lang-server";

/// Name of the diagnostics collection fed by the client.
pub(crate) const DIAGNOSTICS_COLLECTION: &str = "noverify";

/// Files whose edits are forwarded to the server.
const WATCH_GLOB: &str = "**/*.php";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("language server executable path is empty")]
    EmptyExecutablePath,
    #[error("invalid watch pattern {glob:?}")]
    Glob {
        glob: String,
        #[source]
        source: globset::Error,
    },
}

/// Assemble a client definition from a config snapshot.
///
/// The argument list mirrors the standalone linter invocation: user
/// extra args first, then the stubs dir, with `-lang-server` last to
/// switch the binary into server mode.
pub(crate) fn build_client(
    config: &ServerConfig,
    param_hints: bool,
    output: OutputChannel,
) -> Result<LanguageClient, BuildError> {
    if config.executable_path.is_empty() {
        return Err(BuildError::EmptyExecutablePath);
    }

    let mut args = config.extra_args.clone();
    if let Some(stubs) = &config.stubs_path {
        args.push(STUBS_DIR_FLAG.to_string());
        args.push(stubs.to_string_lossy().into_owned());
    }
    args.push(LANG_SERVER_FLAG.to_string());

    let document_selector = vec![
        DocumentFilter::new("file", LANGUAGE_ID),
        DocumentFilter::new("untitled", LANGUAGE_ID),
    ];

    let watch = build_watch_set()?;
    let middleware = Middleware::new(config.features, param_hints);

    output.append(format!(
        "Running command: {} {}",
        config.executable_path,
        args.join(" "),
    ));

    Ok(LanguageClient::new(
        config.server_name.clone(),
        config.executable_path.clone(),
        args,
        document_selector,
        watch,
        middleware,
        output,
    ))
}

fn build_watch_set() -> Result<GlobSet, BuildError> {
    let glob = Glob::new(WATCH_GLOB).map_err(|source| BuildError::Glob {
        glob: WATCH_GLOB.to_string(),
        source,
    })?;
    let mut builder = GlobSetBuilder::new();
    builder.add(glob);
    builder.build().map_err(|source| BuildError::Glob {
        glob: WATCH_GLOB.to_string(),
        source,
    })
}
