use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("key already exists: {key}")]
    DuplicateKey { key: String },

    #[error("write error: {reason}")]
    WriteError { reason: String },

    #[error("read error: {reason}")]
    ReadError { reason: String },

    #[error("SQLite error: {reason}")]
    SqliteError { reason: String },

    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    #[error("deserialization error: {reason}")]
    DeserializationError { reason: String },

    #[error("batch error: {reason}")]
    BatchError { reason: String },
}

impl StorageError {
    pub fn duplicate(key: &[u8]) -> Self {
        StorageError::DuplicateKey {
            key: hex::encode(key),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::SqliteError {
            reason: err.to_string(),
        }
    }
}
