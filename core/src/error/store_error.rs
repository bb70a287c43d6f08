use derive_more::{Display, Error};

/// A security record could not be read, written or deleted.
///
/// Persistence failures are surfaced as operation failures: a lost write can
/// hide an active block or leave a session unrecorded.
#[derive(Debug, Display, Error)]
pub enum StoreError {
    /// I/O failure on the backing storage.
    #[display("i/o failure on record {key}: {source}")]
    Io {
        /// Record key, as `namespace/name`
        key: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The stored bytes do not decode to the expected record.
    #[display("malformed record {key}: {source}")]
    Codec {
        /// Record key, as `namespace/name`
        key: String,
        /// Underlying decoding error
        source: serde_json::Error,
    },

    /// The key cannot be mapped to a storage location.
    #[display("invalid record key: {key}")]
    InvalidKey {
        /// The rejected key
        key: String,
    },
}

impl StoreError {
    /// Returns `true` if the record exists but could not be decoded.
    pub fn is_malformed(&self) -> bool {
        matches!(self, StoreError::Codec { .. })
    }
}
