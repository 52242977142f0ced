//! This module provides a namespace to declare the errors that can occur
//! in this crate.

use tokio_tungstenite::tungstenite as tungstenite;

/// Error types that can occur while working with this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A custom indicator was requested without credentials, or a metadata
    /// call returned 401/403.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Metadata returned 404, the symbol is unknown, or a field referenced
    /// by a condition is absent at evaluation time.
    #[error("not available: {0}")]
    NotAvailable(String),

    /// A blocking read exhausted its timeout.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// An unknown interval token, empty search query, or an invalid call
    /// argument (e.g. a study requested without its prerequisite candle
    /// subscription).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A framing violation, or an unrecoverable connect failure after the
    /// maximum number of reconnect attempts.
    #[error("transport error: {0}")]
    TransportError(String),

    /// A condition grammar violation. Raised at parse time, never at
    /// evaluation time.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Lower-level websocket failure, wrapped transparently.
    #[error("websocket error: {0}")]
    Websocket(#[from] tungstenite::Error),

    /// Lower-level JSON (de)serialization failure, wrapped transparently.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Lower-level HTTP failure from the metadata fetcher, wrapped
    /// transparently.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
