use thiserror::Error;

use super::parser::Tag;

/// Errors surfaced by the DICOM decoder and frame extractor.
#[derive(Debug, Error)]
pub enum DicomError {
    #[error("not a DICOM part-10 file (missing DICM magic)")]
    NotDicom,

    #[error("missing mandatory UID attribute {0}")]
    MissingUid(Tag),

    #[error("unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    #[error("truncated or malformed dataset at {tag}: {detail}")]
    Malformed { tag: Tag, detail: String },

    #[error("no pixel data element in dataset")]
    NoPixelData,

    #[error("frame {requested} out of range (instance has {available} frames)")]
    FrameOutOfRange { requested: u32, available: u32 },

    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

impl DicomError {
    pub(crate) fn malformed(tag: Tag, detail: impl Into<String>) -> Self {
        Self::Malformed {
            tag,
            detail: detail.into(),
        }
    }
}
