use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Faults that are the caller's fault (bad config, bad input shape).
///
/// Runtime failures against endpoints are never reported through this type;
/// they are folded into [`ExecutionError`] values on the response.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid introspection response: {0}")]
    Introspection(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HubResult<T> = Result<T, HubError>;

/// Stable taxonomy of gateway failures the core branches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Timeout,
    Connection,
    #[serde(rename = "HTTP")]
    Http,
    GraphQL,
    #[serde(rename = "JSON")]
    Json,
    Unexpected,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::Connection => "Connection",
            ErrorCategory::Http => "HTTP",
            ErrorCategory::GraphQL => "GraphQL",
            ErrorCategory::Json => "JSON",
            ErrorCategory::Unexpected => "Unexpected",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Reported next to partial data.
    Warning,
    #[default]
    Error,
}

/// A single failure observed while executing an operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
    pub category: ErrorCategory,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ExecutionError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        ExecutionError {
            message: message.into(),
            category,
            severity: Severity::Error,
            path: None,
            extensions: None,
            status_code: None,
            suggestions: Vec::new(),
        }
    }

    pub fn timeout(timeout_secs: u64) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            format!("Request timeout after {} seconds", timeout_secs),
        )
        .with_suggestions(&[
            "Increase timeout",
            "Check network connectivity",
            "Verify server status",
        ])
    }

    pub fn connection(detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Connection,
            format!("Failed to connect to GraphQL endpoint: {}", detail),
        )
        .with_suggestions(&[
            "Check URL",
            "Verify network connectivity",
            "Check firewall settings",
        ])
    }

    pub fn http_status(status: u16, reason: &str) -> Self {
        let mut error = Self::new(ErrorCategory::Http, format!("HTTP {}: {}", status, reason))
            .with_suggestions(http_status_suggestions(status));
        error.status_code = Some(status);
        error
    }

    pub fn invalid_json(detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::Json,
            format!("Invalid JSON response: {}", detail),
        )
        .with_suggestions(&[
            "Check server response format",
            "Verify content-type header",
        ])
    }

    pub fn unexpected(detail: impl fmt::Display) -> Self {
        Self::new(ErrorCategory::Unexpected, format!("Unexpected error: {}", detail))
            .with_suggestions(&[
                "Check query syntax",
                "Verify endpoint configuration",
                "Review error logs",
            ])
    }

    /// Builds a GraphQL-category error from one entry of a response `errors` array.
    pub fn from_graphql(entry: &Value) -> Self {
        let message = entry
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown GraphQL error");
        let extensions = entry.get("extensions").filter(|v| !v.is_null()).cloned();
        let mut error = Self::new(ErrorCategory::GraphQL, message)
            .with_suggestions(&graphql_suggestions(message, extensions.as_ref()));
        error.path = entry.get("path").and_then(Value::as_array).cloned();
        error.extensions = extensions;
        error
    }

    pub fn with_suggestions<S: AsRef<str>>(mut self, suggestions: &[S]) -> Self {
        self.suggestions = suggestions.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Joins error messages the way batch results report them.
pub fn join_messages(errors: &[ExecutionError]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    Some(
        errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn http_status_suggestions(status: u16) -> &'static [&'static str] {
    match status {
        400 => &["Check query syntax", "Verify request format", "Review variables"],
        401 => &["Check authentication", "Verify API key", "Review headers"],
        403 => &["Check permissions", "Verify authorization", "Review endpoint access"],
        404 => &["Check endpoint URL", "Verify service is running", "Review path"],
        429 => &["Reduce request rate", "Implement retry logic", "Check rate limits"],
        500 => &["Check server logs", "Retry request", "Contact support"],
        502 => &["Check gateway configuration", "Verify upstream service", "Retry request"],
        503 => &[
            "Service temporarily unavailable",
            "Retry with backoff",
            "Check maintenance status",
        ],
        504 => &["Increase timeout", "Check upstream service", "Retry request"],
        _ => &["Check server status", "Review error logs"],
    }
}

fn graphql_suggestions(message: &str, extensions: Option<&Value>) -> Vec<&'static str> {
    let message = message.to_lowercase();
    let mut suggestions: Vec<&'static str> = if message.contains("field") && message.contains("not found")
    {
        vec!["Check field name", "Verify schema", "Review field availability"]
    } else if message.contains("syntax") || message.contains("parse") {
        vec!["Check query syntax", "Verify brackets and braces", "Review GraphQL spec"]
    } else if message.contains("validation") {
        vec!["Check field types", "Verify required fields", "Review schema"]
    } else if message.contains("authorization") || message.contains("permission") {
        vec!["Check permissions", "Verify authentication", "Review access rights"]
    } else if message.contains("rate limit") {
        vec!["Reduce request rate", "Implement retry logic", "Check rate limits"]
    } else {
        vec!["Check query structure", "Verify field names", "Review documentation"]
    };

    let code = extensions
        .and_then(|ext| ext.get("code"))
        .and_then(Value::as_str)
        .map(str::to_lowercase);
    if let Some(code) = code {
        if code.contains("timeout") {
            suggestions.extend(["Increase timeout", "Simplify query", "Check server performance"]);
        } else if code.contains("complexity") {
            suggestions.extend(["Reduce query complexity", "Use fragments", "Paginate results"]);
        }
    }

    suggestions
}
