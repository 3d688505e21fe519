//! JSON-RPC message types and URI translation for the NoVerify server.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{Diagnostic, DiagnosticSeverity};

#[derive(Debug, thiserror::Error)]
pub(crate) enum UriError {
    #[error("cannot convert path to file URI: {}", path.display())]
    NotFilePath { path: PathBuf },
    #[error("server sent unparseable URI {raw:?}")]
    Parse {
        raw: String,
        #[source]
        source: url::ParseError,
    },
}

/// Some NoVerify builds emit Windows-path URIs without the third slash
/// (`file://C:/...` instead of `file:///C:/...`). This shim inserts the
/// missing separator before parsing. It is a compatibility workaround
/// for that one malformed pattern, applied identically on every host OS,
/// and deliberately not general URI repair.
static DRIVE_LETTER_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^(file://)([A-Za-z]:)").expect("drive letter pattern is valid")
});

/// Parse a URI string received from the server, applying the
/// drive-letter shim first.
pub(crate) fn parse_server_uri(raw: &str) -> Result<Url, UriError> {
    let fixed = DRIVE_LETTER_URI.replace(raw, "${1}/${2}");
    Url::parse(&fixed).map_err(|source| UriError::Parse {
        raw: raw.to_string(),
        source,
    })
}

/// Serialize a URI for the wire. `Url` keeps the authority component
/// normalized, which is all the outbound direction needs.
pub(crate) fn uri_to_wire(uri: &Url) -> String {
    uri.as_str().to_string()
}

pub(crate) fn path_to_uri(path: &Path) -> Result<Url, UriError> {
    Url::from_file_path(path).map_err(|()| UriError::NotFilePath {
        path: path.to_path_buf(),
    })
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) fn initialize_params(root_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "initializationOptions": {},
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                },
                "completion": {
                    "completionItem": {
                        "snippetSupport": false
                    }
                },
                "documentLink": {
                    "dynamicRegistration": false
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn completion_params(uri: &str, line: u32, character: u32) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": { "line": line, "character": character }
    })
}

pub(crate) fn document_link_params(uri: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<WireDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireDiagnostic {
    pub range: WireRange,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireRange {
    pub start: WirePosition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WirePosition {
    pub line: u32,
    pub character: u32,
}

impl WireDiagnostic {
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic {
            severity: self
                .severity
                .and_then(DiagnosticSeverity::from_wire)
                .unwrap_or(DiagnosticSeverity::Warning),
            message: self.message.clone(),
            line: self.range.start.line,
            col: self.range.start.character,
            source: self.source.clone(),
        }
    }
}

/// A follow-up command attached to a completion item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub title: String,
    pub command: String,
}

/// A single completion item. Fields the bridge does not touch are
/// preserved verbatim in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionItem {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The paginated completion wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionList {
    #[serde(rename = "isIncomplete", default)]
    pub is_incomplete: bool,
    pub items: Vec<CompletionItem>,
}

/// The two shapes a completion result can take on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionReply {
    List(CompletionList),
    Items(Vec<CompletionItem>),
}

impl CompletionReply {
    /// Iterate over the items regardless of shape.
    pub fn items(&self) -> &[CompletionItem] {
        match self {
            Self::List(list) => &list.items,
            Self::Items(items) => items,
        }
    }

    pub(crate) fn items_mut(&mut self) -> &mut [CompletionItem] {
        match self {
            Self::List(list) => &mut list.items,
            Self::Items(items) => items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_letter_uri_gains_separator() {
        let uri = parse_server_uri("file://C:/foo/bar.php").unwrap();
        assert_eq!(uri.as_str(), "file:///C:/foo/bar.php");
    }

    #[test]
    fn test_lowercase_drive_letter_also_fixed() {
        let uri = parse_server_uri("file://c:/www/index.php").unwrap();
        assert_eq!(uri.as_str(), "file:///c:/www/index.php");
    }

    #[test]
    fn test_well_formed_uri_passes_through() {
        let uri = parse_server_uri("file:///home/dev/src/index.php").unwrap();
        assert_eq!(uri.as_str(), "file:///home/dev/src/index.php");
    }

    #[test]
    fn test_shim_only_applies_at_start() {
        // The pattern is anchored; a drive letter later in the string is
        // somebody else's problem.
        let uri = parse_server_uri("file:///srv/file://C:/x.php").unwrap();
        assert_eq!(uri.as_str(), "file:///srv/file://C:/x.php");
    }

    #[test]
    fn test_unparseable_uri_is_error() {
        assert!(parse_server_uri("://nope").is_err());
    }

    #[test]
    fn test_path_uri_roundtrip() {
        let path = PathBuf::from("/home/dev/src/index.php");
        let uri = path_to_uri(&path).unwrap();
        assert_eq!(uri_to_wire(&uri), "file:///home/dev/src/index.php");
    }

    #[test]
    fn test_relative_path_is_not_a_file_uri() {
        assert!(path_to_uri(Path::new("relative/index.php")).is_err());
    }

    #[test]
    fn test_initialize_params_shape() {
        let params = initialize_params("file:///workspace");
        assert!(params["processId"].is_number());
        assert_eq!(params["rootUri"], "file:///workspace");
        assert!(params["initializationOptions"].is_object());
        assert!(params["capabilities"]["textDocument"]["publishDiagnostics"].is_object());
        assert!(params["capabilities"]["textDocument"]["documentLink"].is_object());
    }

    #[test]
    fn test_request_omits_absent_params() {
        let json = serde_json::to_value(Request::new(3, "shutdown", None)).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 3);
        assert!(json.get("params").is_none(), "params must be omitted, not null");
    }

    #[test]
    fn test_notification_has_no_id() {
        let json = serde_json::to_value(Notification::new("exit", None)).unwrap();
        assert_eq!(json["method"], "exit");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_did_change_params_shape() {
        let params = did_change_params("file:///a.php", 4, "<?php echo 1;");
        assert_eq!(params["textDocument"]["version"], 4);
        assert_eq!(params["contentChanges"][0]["text"], "<?php echo 1;");
    }

    #[test]
    fn test_wire_diagnostic_defaults_to_warning() {
        let json = serde_json::json!({
            "range": { "start": { "line": 2, "character": 7 },
                       "end": { "line": 2, "character": 9 } },
            "message": "possibly undefined"
        });
        let wire: WireDiagnostic = serde_json::from_value(json).unwrap();
        let diag = wire.to_diagnostic();
        assert_eq!(diag.severity, DiagnosticSeverity::Warning);
        assert_eq!(diag.line, 2);
        assert_eq!(diag.col, 7);
        assert_eq!(diag.source, None);
    }

    #[test]
    fn test_publish_diagnostics_parses() {
        let json = serde_json::json!({
            "uri": "file:///index.php",
            "diagnostics": [{
                "range": { "start": { "line": 0, "character": 0 },
                           "end": { "line": 0, "character": 5 } },
                "severity": 1,
                "source": "noverify",
                "message": "undefined function foo()"
            }]
        });
        let params: PublishDiagnosticsParams = serde_json::from_value(json).unwrap();
        assert_eq!(params.uri, "file:///index.php");
        assert_eq!(params.diagnostics.len(), 1);
        assert!(params.diagnostics[0].to_diagnostic().severity.is_error());
    }

    #[test]
    fn test_completion_reply_bare_list() {
        let json = serde_json::json!([
            { "label": "strlen", "kind": 3 },
            { "label": "strpos", "kind": 3 }
        ]);
        let reply: CompletionReply = serde_json::from_value(json).unwrap();
        assert!(matches!(reply, CompletionReply::Items(_)));
        assert_eq!(reply.items().len(), 2);
        // Unknown fields survive the round trip.
        assert_eq!(reply.items()[0].extra["kind"], 3);
    }

    #[test]
    fn test_completion_reply_paginated_list() {
        let json = serde_json::json!({
            "isIncomplete": true,
            "items": [{ "label": "array_map" }]
        });
        let reply: CompletionReply = serde_json::from_value(json).unwrap();
        match &reply {
            CompletionReply::List(list) => {
                assert!(list.is_incomplete);
                assert_eq!(list.items.len(), 1);
            }
            CompletionReply::Items(_) => panic!("expected paginated list"),
        }
    }
}
