//! Caller-visible error taxonomy for the ingestion pipeline.
//!
//! Unparsable cells and invalid rows are not errors (they degrade in place);
//! everything here is either a rejected file or a fatal storage failure.

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The file matched no filename hint and no column signature.
    #[error("unrecognized file type for '{0}': expected a sales, quotation or quoted-products export")]
    UnknownFileType(String),

    /// The file decoded to zero usable rows and columns.
    #[error("file '{0}' is empty or has no header row")]
    EmptyFile(String),

    /// The file could not be decoded as CSV or Excel at all.
    #[error("failed to read '{filename}': {source}")]
    UnreadableFile {
        filename: String,
        #[source]
        source: anyhow::Error,
    },

    /// The upload carried no files.
    #[error("no files in upload")]
    NoFiles,

    /// Storage-layer failure; the upload transaction was rolled back.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IngestError {
    /// HTTP status the error maps to at the service boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownFileType(_)
            | Self::EmptyFile(_)
            | Self::UnreadableFile { .. }
            | Self::NoFiles => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
