// src/error.rs

//! Unified error handling for the pipeline stages.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSV reading/writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Relational store error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Message broker error
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Snapshot file unreadable or malformed
    #[error("Snapshot error for {path}: {message}")]
    Snapshot { path: String, message: String },

    /// Queue payload could not be interpreted
    #[error("Unexpected message: {0}")]
    Message(String),

    /// Detail document missing or unusable
    #[error("Document error for {context}: {message}")]
    Document { context: String, message: String },

    /// Broker negatively confirmed a publish
    #[error("Broker rejected message for {queue}")]
    PublishRejected { queue: String },

    /// Broker stopped delivering to a consumer
    #[error("Consumer on {queue} closed")]
    ConsumerClosed { queue: String },

    /// Bounded retry budget spent
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<AppError>,
    },
}

/// What the consumer loop does with a message after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished (or the message can never succeed): acknowledge.
    Ack,
    /// Negative-acknowledge with requeue so the broker redelivers later.
    Requeue,
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a snapshot error.
    pub fn snapshot(path: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Snapshot {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an unexpected-message error.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Create a document error with context.
    pub fn document(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Document {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same call may succeed (timeouts, resets, 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::HttpStatus { status, .. } => *status >= 500,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
            ),
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Self::Broker(_) | Self::PublishRejected { .. } => true,
            _ => false,
        }
    }

    /// Data failures: redelivering the same message cannot fix them.
    pub fn is_data_error(&self) -> bool {
        match self {
            Self::Snapshot { .. }
            | Self::Validation(_)
            | Self::Message(_)
            | Self::Document { .. }
            | Self::Json(_)
            | Self::Csv(_)
            | Self::Url(_) => true,
            Self::HttpStatus { status, .. } => (400..500).contains(status),
            // The request could not be built from the message (bad URL).
            Self::Http(e) => e.is_builder(),
            _ => false,
        }
    }

    /// Map the outcome of a message handler to an ack decision.
    pub fn disposition(&self) -> Disposition {
        if self.is_data_error() {
            Disposition::Ack
        } else {
            Disposition::Requeue
        }
    }
}
