//! Parser errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read input: {0}")]
    Read(#[from] std::io::Error),

    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

impl From<quick_xml::Error> for ParseError {
    fn from(e: quick_xml::Error) -> Self {
        match e {
            // Reader failures (a decompressor hitting corrupt data
            // mid-stream) stay I/O errors.
            quick_xml::Error::Io(io) => ParseError::Read(std::io::Error::new(io.kind(), io.to_string())),
            other => ParseError::Xml(other.to_string()),
        }
    }
}
