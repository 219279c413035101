use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "basic ",
    "authorization:",
    "password",
    "api_key",
    "apikey ",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for operator display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Operator-facing rendering of a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

impl std::fmt::Display for ErrorPresentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.message)?;
        if let Some(action) = &self.action {
            write!(f, " ({})", action)?;
        }
        Ok(())
    }
}

/// Broad classification of a fatal error, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Transport,
    Protocol,
    Decode,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Decode => "decode",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Application-wide error type. Every variant is fatal to an export run.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Config(String),

    // ── Transport ─────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Elasticsearch returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    // ── Protocol / payload ────────────────────────────────────────────────────
    #[error("Unexpected response: {0}")]
    Protocol(String),

    #[error("Invalid JSON: {0}")]
    Decode(String),

    // ── Output ────────────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config(_) => ErrorKind::Config,
            AppError::ConnectionFailed(_) | AppError::Remote { .. } => ErrorKind::Transport,
            AppError::Protocol(_) => ErrorKind::Protocol,
            AppError::Decode(_) => ErrorKind::Decode,
            AppError::Io(_) => ErrorKind::Io,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// One-line description for logs, built from the sanitized presentation.
    pub fn log_line(&self) -> String {
        let presentation = self.to_presentation();
        format!(
            "{} error: {}: {}",
            self.kind().as_str(),
            presentation.title,
            presentation.message
        )
    }

    /// Converts the error into a presentation suitable for the terminal.
    /// Never leaks passwords or authorization headers.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            AppError::Config(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The export configuration is invalid."),
                action: Some("Check the command-line flags and config file".into()),
            },

            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Could not reach the Elasticsearch endpoint.".into(),
                action: Some("Check host, port and network, then retry".into()),
            },

            AppError::Remote { status, message } => {
                let action = match status {
                    401 | 403 => Some("Check the username and password".into()),
                    404 => Some("Check the index name; the scroll may also have expired".into()),
                    429 => Some("Wait and retry with a smaller page size".into()),
                    _ => None,
                };
                ErrorPresentation {
                    title: "Elasticsearch Error".into(),
                    message: format!(
                        "HTTP {}: {}",
                        status,
                        sanitize_message(message, "the request was rejected")
                    ),
                    action,
                }
            }

            AppError::Protocol(msg) => ErrorPresentation {
                title: "Unexpected Response".into(),
                message: sanitize_message(msg, "The server response had an unexpected shape."),
                action: Some("Verify the endpoint is an Elasticsearch search API".into()),
            },

            AppError::Decode(msg) => ErrorPresentation {
                title: "Invalid Response".into(),
                message: sanitize_message(msg, "The server response was not valid JSON."),
                action: Some("Verify the endpoint is an Elasticsearch search API".into()),
            },

            AppError::Io(msg) => ErrorPresentation {
                title: "Write Failed".into(),
                message: sanitize_message(msg, "Could not write an export file."),
                action: Some("Check the output directory permissions and free space".into()),
            },

            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong inside the exporter.".into(),
                action: Some("Re-run with RUST_LOG=debug for details".into()),
            },
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}
