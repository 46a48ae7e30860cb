//! Error types for post-relay.

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Chat transport errors (send, edit, delete, polling).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message to {chat_id}: {reason}")]
    SendFailed { chat_id: i64, reason: String },

    #[error("Failed to edit message {message_id} in {chat_id}: {reason}")]
    EditFailed {
        chat_id: i64,
        message_id: i64,
        reason: String,
    },

    #[error("Failed to delete message {message_id} in {chat_id}: {reason}")]
    DeleteFailed {
        chat_id: i64,
        message_id: i64,
        reason: String,
    },

    #[error("Failed to download file {file_id}: {reason}")]
    DownloadFailed { file_id: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Filter expression errors.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("Malformed filter term '{term}': {reason}")]
    MalformedExpression { term: String, reason: String },
}

/// Rule interchange (CSV) errors.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("CSV file is empty")]
    Empty,

    #[error("Unknown CSV layout: {columns} columns")]
    UnknownLayout { columns: usize },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
