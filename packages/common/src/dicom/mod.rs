mod error;
mod frames;
mod json;
mod parser;
mod recode;

pub mod tags;
pub mod ts;

pub use error::DicomError;
pub use frames::{FrameKind, extract_frame};
pub use json::dataset_to_json;
pub use recode::recode;
pub use parser::{DataElement, Dataset, DicomHeader, ElementValue, Tag, Vr, parse_header};
