//! PS3.18 DICOM-JSON encoding of an attribute set. Pixel data and group
//! lengths are never projected; person names render in the Alphabetic form.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

use super::parser::{DataElement, Dataset, ElementValue, Vr};
use super::tags;

/// Encode a dataset as one PS3.18 JSON object keyed by tag hex.
pub fn dataset_to_json(dataset: &Dataset) -> Value {
    let mut obj = Map::new();
    for element in dataset.iter() {
        if element.tag == tags::PIXEL_DATA || element.tag.element == 0x0000 {
            continue;
        }
        obj.insert(element.tag.key(), element_to_json(element));
    }
    Value::Object(obj)
}

fn element_to_json(element: &DataElement) -> Value {
    let mut obj = Map::new();
    obj.insert("vr".into(), Value::String(element.vr.as_str().into()));

    match &element.value {
        ElementValue::Empty => {}
        ElementValue::Str(s) => {
            let values = string_values(element.vr, s);
            if !values.is_empty() {
                obj.insert("Value".into(), Value::Array(values));
            }
        }
        ElementValue::Ints(v) => {
            obj.insert(
                "Value".into(),
                Value::Array(v.iter().map(|n| json!(n)).collect()),
            );
        }
        ElementValue::Floats(v) => {
            let values: Vec<Value> = v
                .iter()
                .filter_map(|n| serde_json::Number::from_f64(*n).map(Value::Number))
                .collect();
            obj.insert("Value".into(), Value::Array(values));
        }
        ElementValue::Bytes(raw) => {
            obj.insert("InlineBinary".into(), Value::String(BASE64.encode(raw)));
        }
        ElementValue::Items(items) => {
            obj.insert(
                "Value".into(),
                Value::Array(items.iter().map(dataset_to_json).collect()),
            );
        }
    }
    Value::Object(obj)
}

fn string_values(vr: Vr, raw: &str) -> Vec<Value> {
    raw.split('\\')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match vr {
            Vr::PN => json!({ "Alphabetic": s }),
            Vr::IS => s
                .parse::<i64>()
                .map(|n| json!(n))
                .unwrap_or_else(|_| Value::String(s.into())),
            Vr::DS => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(s.into())),
            _ => Value::String(s.into()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::parser::{DataElement, Dataset, ElementValue, Vr};
    use super::super::tags;
    use super::*;

    fn str_element(tag: super::super::parser::Tag, vr: Vr, value: &str) -> DataElement {
        DataElement {
            tag,
            vr,
            value: ElementValue::Str(value.to_string()),
        }
    }

    #[test]
    fn person_name_uses_alphabetic_form() {
        let mut ds = Dataset::default();
        ds.push(str_element(tags::PATIENT_NAME, Vr::PN, "Doe^Jane"));
        let json = dataset_to_json(&ds);
        assert_eq!(
            json["00100010"],
            serde_json::json!({ "vr": "PN", "Value": [{ "Alphabetic": "Doe^Jane" }] })
        );
    }

    #[test]
    fn is_and_ds_encode_as_numbers() {
        let mut ds = Dataset::default();
        ds.push(str_element(tags::INSTANCE_NUMBER, Vr::IS, "12"));
        ds.push(str_element(super::super::parser::Tag::new(0x0018, 0x0050), Vr::DS, "2.5"));
        let json = dataset_to_json(&ds);
        assert_eq!(json["00200013"]["Value"][0], serde_json::json!(12));
        assert_eq!(json["00180050"]["Value"][0], serde_json::json!(2.5));
    }

    #[test]
    fn multivalue_splits_on_backslash() {
        let mut ds = Dataset::default();
        ds.push(str_element(
            super::super::parser::Tag::new(0x0008, 0x0008),
            Vr::CS,
            "ORIGINAL\\PRIMARY",
        ));
        let json = dataset_to_json(&ds);
        assert_eq!(
            json["00080008"]["Value"],
            serde_json::json!(["ORIGINAL", "PRIMARY"])
        );
    }

    #[test]
    fn empty_value_omits_value_key() {
        let mut ds = Dataset::default();
        ds.push(DataElement {
            tag: tags::ACCESSION_NUMBER,
            vr: Vr::SH,
            value: ElementValue::Empty,
        });
        let json = dataset_to_json(&ds);
        assert_eq!(json["00080050"], serde_json::json!({ "vr": "SH" }));
    }

    #[test]
    fn pixel_data_and_group_lengths_are_excluded() {
        let mut ds = Dataset::default();
        ds.push(DataElement {
            tag: tags::PIXEL_DATA,
            vr: Vr::OW,
            value: ElementValue::Bytes(vec![1, 2, 3]),
        });
        ds.push(DataElement {
            tag: super::super::parser::Tag::new(0x0008, 0x0000),
            vr: Vr::UL,
            value: ElementValue::Ints(vec![100]),
        });
        let json = dataset_to_json(&ds);
        assert_eq!(json.as_object().unwrap().len(), 0);
    }

    #[test]
    fn binary_values_inline_as_base64() {
        let mut ds = Dataset::default();
        ds.push(DataElement {
            tag: super::super::parser::Tag::new(0x0029, 0x1010),
            vr: Vr::OB,
            value: ElementValue::Bytes(vec![0xDE, 0xAD]),
        });
        let json = dataset_to_json(&ds);
        assert_eq!(json["00291010"]["InlineBinary"], serde_json::json!("3q0="));
    }
}
