use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Why a call to the text-generation backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationFailureKind {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// The backend rejected the credentials (401/403).
    Unauthorized,
    /// The backend is throttling us (429).
    RateLimited,
    /// The backend failed or could not be reached (5xx, connection errors).
    Upstream,
    /// The backend refused the request for any other reason (4xx).
    Rejected,
    /// The response could not be interpreted as a completion.
    MalformedResponse,
    /// The circuit breaker is open and the call was not attempted.
    CircuitOpen,
}

impl GenerationFailureKind {
    /// Whether another attempt may succeed without changing the request.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            GenerationFailureKind::Timeout
                | GenerationFailureKind::RateLimited
                | GenerationFailureKind::Upstream
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            GenerationFailureKind::Timeout => "timeout",
            GenerationFailureKind::Unauthorized => "unauthorized",
            GenerationFailureKind::RateLimited => "rate limited",
            GenerationFailureKind::Upstream => "upstream failure",
            GenerationFailureKind::Rejected => "rejected",
            GenerationFailureKind::MalformedResponse => "malformed response",
            GenerationFailureKind::CircuitOpen => "circuit open",
        }
    }
}

/// A failed text-generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFailure {
    pub kind: GenerationFailureKind,
    pub message: String,
}

impl GenerationFailure {
    pub fn new(kind: GenerationFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind.as_str())
    }
}

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// The request is missing a file, a key, or carries unusable input.
    Validation(String),
    /// No record matches the lookup key.
    NotFound(String),
    /// The uploaded workbook could not be read.
    InvalidDataset(String),
    /// The text-generation backend failed.
    Generation(GenerationFailure),
    /// Writing the generated message failed.
    Persistence(String),
    /// Internal server error.
    Internal(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Shorthand for a generation error of the given kind.
    pub fn generation(kind: GenerationFailureKind, message: impl Into<String>) -> Self {
        AppError::Generation(GenerationFailure::new(kind, message))
    }

    /// Strips context wrappers and returns the root error.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable machine-readable code, returned to HTTP callers.
    pub fn code(&self) -> &'static str {
        match self.root() {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidDataset(_) => "invalid_dataset",
            AppError::Generation(_) => "generation_error",
            AppError::Persistence(_) => "persistence_error",
            AppError::Internal(_) | AppError::WithContext { .. } => "internal_error",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self.root() {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidDataset(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Generation(_) => StatusCode::BAD_GATEWAY,
            AppError::Persistence(_) | AppError::Internal(_) | AppError::WithContext { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a retry policy may attempt the failed operation again.
    pub fn is_transient(&self) -> bool {
        match self.root() {
            AppError::Generation(failure) => failure.kind.is_transient(),
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::InvalidDataset(msg) => write!(f, "Invalid dataset: {}", msg),
            AppError::Generation(failure) => write!(f, "Generation error: {}", failure),
            AppError::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Validation and not-found errors carry their message to the caller;
    /// backend and storage failures are logged and answered with a generic
    /// message.
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if let AppError::WithContext { context, source } = &self {
            // Log full context chain for debugging
            tracing::error!("Error with context: {} -> {}", context, source);
        }

        let error_message = match self.root() {
            AppError::Validation(msg) | AppError::NotFound(msg) => msg.clone(),
            AppError::InvalidDataset(msg) => {
                tracing::warn!("Unreadable dataset: {}", msg);
                format!("Could not read spreadsheet: {}", msg)
            }
            AppError::Generation(failure) => {
                tracing::error!("Text generation failed: {}", failure);
                match failure.kind {
                    GenerationFailureKind::RateLimited | GenerationFailureKind::CircuitOpen => {
                        "Text generation service is busy, try again later".to_string()
                    }
                    _ => "Text generation service error".to_string(),
                }
            }
            AppError::Persistence(msg) => {
                tracing::error!("Persistence error: {}", msg);
                "Failed to save generated message".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::WithContext { .. } => "Internal server error".to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into a generation error.
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            GenerationFailureKind::Timeout
        } else if err.is_decode() {
            GenerationFailureKind::MalformedResponse
        } else {
            GenerationFailureKind::Upstream
        };
        AppError::generation(kind, err.to_string())
    }
}

impl From<calamine::Error> for AppError {
    fn from(err: calamine::Error) -> Self {
        AppError::InvalidDataset(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// I/O failures only occur while persisting, so they map to `Persistence`.
impl<T> ResultExt<T> for Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::Persistence(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::Persistence(format!("{}: {}", f(), e)))
    }
}
