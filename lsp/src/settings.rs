//! Settings file parsing and immutable config snapshots.
//!
//! Settings live in a TOML file under the `php-noverify` namespace,
//! keeping the camelCase key names of the original settings schema.
//! Every read produces a fresh [`ServerConfig`] snapshot; snapshots are
//! compared structurally to decide whether a rebuild is necessary.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

/// Settings namespace owned by the bridge.
pub const SETTINGS_NAMESPACE: &str = "php-noverify";

/// Display name of the server, also used for the output channel.
pub const SERVER_NAME: &str = "NoVerify Language Server";

/// Language identifier of the target source language.
pub const LANGUAGE_ID: &str = "php";

const DEFAULT_EXECUTABLE: &str = "noverify";

/// Fully-qualified settings keys, for change filtering.
pub mod keys {
    pub const USE_LANGUAGE_SERVER: &str = "php-noverify.useLanguageServer";
    pub const NOVERIFY_PATH: &str = "php-noverify.noverifyPath";
    pub const PHP_STUBS_PATH: &str = "php-noverify.phpStubsPath";
    pub const NOVERIFY_EXTRA_ARGS: &str = "php-noverify.noverifyExtraArgs";
    pub const FEATURE_DIAGNOSTICS: &str = "php-noverify.features.diagnostics";
    pub const FEATURE_DOCUMENT_LINK: &str = "php-noverify.features.documentLink";
    pub const EDITOR_PARAMETER_HINTS: &str = "editor.parameterHints.enabled";
    pub const PHP_PARAMETER_HINTS: &str = "php.editor.parameterHints.enabled";
}

const fn default_true() -> bool {
    true
}

fn default_executable() -> String {
    DEFAULT_EXECUTABLE.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings at {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings at {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Protocol feature toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Features {
    #[serde(default = "default_true")]
    pub diagnostics: bool,
    #[serde(rename = "documentLink", default = "default_true")]
    pub document_link: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            diagnostics: true,
            document_link: true,
        }
    }
}

/// The `[php-noverify]` section of the settings file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NoverifySection {
    #[serde(rename = "noverifyPath", default = "default_executable")]
    pub noverify_path: String,
    /// Unset means "use the bundled stubs next to the install dir";
    /// an explicitly empty string means "no stubs dir at all".
    #[serde(rename = "phpStubsPath", default)]
    pub php_stubs_path: Option<String>,
    #[serde(rename = "noverifyExtraArgs", default)]
    pub noverify_extra_args: Vec<String>,
    #[serde(rename = "useLanguageServer", default)]
    pub use_language_server: bool,
    #[serde(default)]
    pub features: Features,
}

impl Default for NoverifySection {
    fn default() -> Self {
        Self {
            noverify_path: default_executable(),
            php_stubs_path: None,
            noverify_extra_args: Vec::new(),
            use_language_server: false,
            features: Features::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ParameterHints {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ParameterHints {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Global editor settings the completion middleware consults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct EditorSection {
    #[serde(rename = "parameterHints", default)]
    pub parameter_hints: ParameterHints,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PhpParameterHints {
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PhpEditorSection {
    #[serde(rename = "parameterHints", default)]
    pub parameter_hints: PhpParameterHints,
}

/// The `[php]` section: per-language editor overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PhpSection {
    #[serde(default)]
    pub editor: PhpEditorSection,
}

/// Full parsed settings file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(rename = "php-noverify", default)]
    pub noverify: NoverifySection,
    #[serde(default)]
    pub editor: EditorSection,
    #[serde(default)]
    pub php: PhpSection,
}

impl Settings {
    /// Read the settings file. A missing file yields defaults.
    ///
    /// Pure read, no side effects; safe to call at any time, including
    /// before any client exists.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default settings file location under the user config dir.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("noverify-bridge").join("settings.toml"))
    }

    /// Produce an immutable config snapshot.
    ///
    /// `install_dir` anchors the stubs-path default: when `phpStubsPath`
    /// is unset the stubs are expected at `<install_dir>/../stubs`.
    #[must_use]
    pub fn server_config(&self, install_dir: &Path) -> ServerConfig {
        let stubs_path = match &self.noverify.php_stubs_path {
            None => Some(default_stubs_path(install_dir)),
            Some(path) if path.is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
        };

        ServerConfig {
            server_name: SERVER_NAME.to_string(),
            executable_path: self.noverify.noverify_path.clone(),
            enabled: self.noverify.use_language_server,
            stubs_path,
            extra_args: self.noverify.noverify_extra_args.clone(),
            features: self.noverify.features,
        }
    }

    /// Whether parameter hints are enabled for PHP.
    ///
    /// The per-language override wins; without one the global editor
    /// setting applies.
    #[must_use]
    pub fn parameter_hints_enabled(&self) -> bool {
        self.php
            .editor
            .parameter_hints
            .enabled
            .unwrap_or(self.editor.parameter_hints.enabled)
    }
}

fn default_stubs_path(install_dir: &Path) -> PathBuf {
    normalize_path(&install_dir.join("..").join("stubs"))
}

/// Lexical path normalization: resolves `.` and `..` without touching
/// the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Immutable snapshot used to build (and rebuild-gate) a client.
///
/// Equality is structural; `extra_args` compares order-sensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub server_name: String,
    pub executable_path: String,
    pub enabled: bool,
    pub stubs_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
    pub features: Features,
}

/// The set of settings keys that changed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChange {
    changed: BTreeSet<&'static str>,
}

impl SettingsChange {
    /// Diff two settings snapshots into the set of changed keys.
    #[must_use]
    pub fn between(old: &Settings, new: &Settings) -> Self {
        let mut changed = BTreeSet::new();

        if old.noverify.noverify_path != new.noverify.noverify_path {
            changed.insert(keys::NOVERIFY_PATH);
        }
        if old.noverify.php_stubs_path != new.noverify.php_stubs_path {
            changed.insert(keys::PHP_STUBS_PATH);
        }
        if old.noverify.noverify_extra_args != new.noverify.noverify_extra_args {
            changed.insert(keys::NOVERIFY_EXTRA_ARGS);
        }
        if old.noverify.use_language_server != new.noverify.use_language_server {
            changed.insert(keys::USE_LANGUAGE_SERVER);
        }
        if old.noverify.features.diagnostics != new.noverify.features.diagnostics {
            changed.insert(keys::FEATURE_DIAGNOSTICS);
        }
        if old.noverify.features.document_link != new.noverify.features.document_link {
            changed.insert(keys::FEATURE_DOCUMENT_LINK);
        }
        if old.editor.parameter_hints.enabled != new.editor.parameter_hints.enabled {
            changed.insert(keys::EDITOR_PARAMETER_HINTS);
        }
        if old.php.editor.parameter_hints.enabled != new.php.editor.parameter_hints.enabled {
            changed.insert(keys::PHP_PARAMETER_HINTS);
        }

        Self { changed }
    }

    /// Whether any changed key falls under `key` (section-prefix match,
    /// like the original host's `affectsConfiguration`).
    #[must_use]
    pub fn affects(&self, key: &str) -> bool {
        self.changed.iter().any(|changed| {
            changed
                .strip_prefix(key)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}
