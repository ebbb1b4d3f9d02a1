use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue payload published by the ingest handlers and consumed by the
/// indexing workers. One message per received DICOM file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestMessage {
    /// Absolute path of the spooled file on the ingest host.
    pub file_path: String,
    pub tenant_code: String,
    pub received_at: DateTime<Utc>,
}

impl IngestMessage {
    pub fn new(file_path: impl Into<String>, tenant_code: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            tenant_code: tenant_code.into(),
            received_at: Utc::now(),
        }
    }
}
