//! Small builders for PS3.18 DICOM-JSON records assembled from database
//! rows (as opposed to full datasets, which `common::dicom` projects).

use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use serde_json::{Map, Value, json};

pub const CONTENT_TYPE_DICOM_JSON: &str = "application/dicom+json";

#[derive(Default)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn str(mut self, tag: &str, vr: &str, value: Option<&str>) -> Self {
        let mut attr = Map::new();
        attr.insert("vr".into(), json!(vr));
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            attr.insert("Value".into(), json!([v]));
        }
        self.0.insert(tag.into(), Value::Object(attr));
        self
    }

    pub fn pn(mut self, tag: &str, value: Option<&str>) -> Self {
        let mut attr = Map::new();
        attr.insert("vr".into(), json!("PN"));
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            attr.insert("Value".into(), json!([{ "Alphabetic": v }]));
        }
        self.0.insert(tag.into(), Value::Object(attr));
        self
    }

    pub fn int(mut self, tag: &str, vr: &str, value: Option<i64>) -> Self {
        let mut attr = Map::new();
        attr.insert("vr".into(), json!(vr));
        if let Some(v) = value {
            attr.insert("Value".into(), json!([v]));
        }
        self.0.insert(tag.into(), Value::Object(attr));
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.0)
    }
}

/// Stream records as a JSON array without buffering the whole body: one
/// chunk per record, brackets and commas emitted in sequence.
pub fn stream_records(records: Vec<Value>) -> Response {
    let count = records.len();
    let chunks = records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            let prefix = if i == 0 { "[" } else { "," };
            Ok::<Bytes, std::convert::Infallible>(Bytes::from(format!("{prefix}{record}")))
        })
        .chain(std::iter::once(Ok(Bytes::from(if count == 0 {
            "[]"
        } else {
            "]"
        }))));

    Response::builder()
        .header(header::CONTENT_TYPE, CONTENT_TYPE_DICOM_JSON)
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .expect("static response build")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_emits_ps318_shape() {
        let record = Record::new()
            .str("0020000D", "UI", Some("1.2.1"))
            .pn("00100010", Some("Doe^Jane"))
            .int("00201208", "IS", Some(42))
            .str("00080050", "SH", None)
            .build();
        assert_eq!(
            record,
            json!({
                "0020000D": { "vr": "UI", "Value": ["1.2.1"] },
                "00100010": { "vr": "PN", "Value": [{ "Alphabetic": "Doe^Jane" }] },
                "00201208": { "vr": "IS", "Value": [42] },
                "00080050": { "vr": "SH" },
            })
        );
    }

    #[tokio::test]
    async fn streamed_array_is_valid_json() {
        let response = stream_records(vec![json!({"a": 1}), json!({"b": 2})]);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, json!([{"a": 1}, {"b": 2}]));
    }

    #[tokio::test]
    async fn empty_result_is_empty_array() {
        let response = stream_records(vec![]);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"[]");
    }
}
