//! Container-level transfer-syntax conversion.
//!
//! The deflated explicit-VR syntax is a pure repackaging: the file meta
//! group stays plain while everything after it is one raw-deflate blob.
//! Converting to or from it means rewriting the meta group's
//! TransferSyntaxUID (and its group length) and running the dataset
//! bytes through deflate or inflate — no pixel decoding involved.
//! Syntax pairs that would need a pixel codec are reported as
//! unsupported so callers can surface the missing capability.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use super::error::DicomError;
use super::parser::{ByteSource, Tag, Vr, read_element_head};
use super::{tags, ts};

struct MetaElement {
    tag: Tag,
    vr: Vr,
    value: Vec<u8>,
}

/// Re-encode a whole part-10 file at `target_tsuid`. Returns the input
/// unchanged when it is already there.
pub fn recode(bytes: &[u8], target_tsuid: &str) -> Result<Vec<u8>, DicomError> {
    let mut src = ByteSource::new(bytes);

    let mut preamble = [0u8; 132];
    src.read_exact(&mut preamble)
        .map_err(|_| DicomError::NotDicom)?;
    if &preamble[128..] != b"DICM" {
        return Err(DicomError::NotDicom);
    }
    let head = read_element_head(&mut src, true, false)?.ok_or(DicomError::NotDicom)?;
    if head.tag != tags::FILE_META_GROUP_LENGTH || head.length != 4 {
        return Err(DicomError::NotDicom);
    }
    let group_len = src.read_u32(false)? as u64;

    let mut elements = Vec::new();
    let end = src.position() + group_len;
    while src.position() < end {
        let Some(head) = read_element_head(&mut src, true, false)? else {
            break;
        };
        let value = src.read_vec(head.length as usize)?;
        elements.push(MetaElement {
            tag: head.tag,
            vr: head.vr,
            value,
        });
    }

    let source_tsuid = elements
        .iter()
        .find(|e| e.tag == tags::TRANSFER_SYNTAX_UID)
        .map(|e| {
            String::from_utf8_lossy(&e.value)
                .trim_end_matches(['\0', ' '])
                .to_string()
        })
        .ok_or(DicomError::MissingUid(tags::TRANSFER_SYNTAX_UID))?;

    if source_tsuid == target_tsuid {
        return Ok(bytes.to_vec());
    }

    let dataset = &bytes[src.position() as usize..];
    let body = match (source_tsuid.as_str(), target_tsuid) {
        (ts::EXPLICIT_VR_LITTLE_ENDIAN, ts::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN) => {
            deflate(dataset)?
        }
        (ts::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN, ts::EXPLICIT_VR_LITTLE_ENDIAN) => {
            inflate(dataset)?
        }
        _ => {
            return Err(DicomError::UnsupportedTransferSyntax(format!(
                "{source_tsuid} -> {target_tsuid}"
            )));
        }
    };

    for element in &mut elements {
        if element.tag == tags::TRANSFER_SYNTAX_UID {
            element.value = padded_ui(target_tsuid);
        }
    }

    let mut meta_body = Vec::new();
    for element in &elements {
        emit_element(&mut meta_body, element);
    }

    let mut out = Vec::with_capacity(preamble.len() + 12 + meta_body.len() + body.len());
    out.extend_from_slice(&preamble);
    out.extend_from_slice(&tags::FILE_META_GROUP_LENGTH.group.to_le_bytes());
    out.extend_from_slice(&tags::FILE_META_GROUP_LENGTH.element.to_le_bytes());
    out.extend_from_slice(b"UL");
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&(meta_body.len() as u32).to_le_bytes());
    out.extend_from_slice(&meta_body);
    out.extend_from_slice(&body);
    Ok(out)
}

fn padded_ui(uid: &str) -> Vec<u8> {
    let mut value = uid.as_bytes().to_vec();
    if value.len() % 2 == 1 {
        value.push(0);
    }
    value
}

fn emit_element(buf: &mut Vec<u8>, element: &MetaElement) {
    buf.extend_from_slice(&element.tag.group.to_le_bytes());
    buf.extend_from_slice(&element.tag.element.to_le_bytes());
    buf.extend_from_slice(element.vr.as_str().as_bytes());
    if element.vr.has_long_header() {
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&(element.value.len() as u32).to_le_bytes());
    } else {
        buf.extend_from_slice(&(element.value.len() as u16).to_le_bytes());
    }
    buf.extend_from_slice(&element.value);
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, DicomError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, DicomError> {
    let mut out = Vec::new();
    DeflateDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::parser::testdata::mr_header;
    use super::super::{FrameKind, extract_frame, parse_header, tags, ts};
    use super::*;

    fn explicit_file() -> Vec<u8> {
        mr_header(ts::EXPLICIT_VR_LITTLE_ENDIAN)
            .str(tags::NUMBER_OF_FRAMES, "IS", "3")
            .us(tags::ROWS, 4)
            .us(tags::COLUMNS, 4)
            .us(tags::BITS_ALLOCATED, 8)
            .us(tags::SAMPLES_PER_PIXEL, 1)
            .native_pixel_data(&(0..48u8).collect::<Vec<_>>())
            .build()
    }

    #[test]
    fn identity_recode_is_a_no_op() {
        let original = explicit_file();
        let same = recode(&original, ts::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(same, original);
    }

    #[test]
    fn deflated_file_still_parses() {
        let original = explicit_file();
        let deflated = recode(&original, ts::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_ne!(deflated, original);

        let header = parse_header(&deflated[..]).unwrap();
        assert_eq!(header.sop_uid, "1.2.3");
        assert_eq!(header.modality, "MR");
        assert_eq!(header.number_of_frames, 3);
        assert_eq!(
            header.transfer_syntax_uid,
            ts::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN
        );
    }

    #[test]
    fn deflate_round_trip_restores_the_original_bytes() {
        let original = explicit_file();
        let deflated = recode(&original, ts::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let restored = recode(&deflated, ts::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn frames_extract_from_deflated_files() {
        let original = explicit_file();
        let deflated = recode(&original, ts::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN).unwrap();

        let kind = FrameKind::classify(ts::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN, 3);
        assert_eq!(kind, FrameKind::UncompressedMulti);

        let mut out = Vec::new();
        extract_frame(&deflated[..], 2, kind, &mut out).unwrap();
        let expected: Vec<u8> = (16..32u8).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn codec_pairs_are_reported_unsupported() {
        let original = explicit_file();
        let err = recode(&original, "1.2.840.10008.1.2.4.50").unwrap_err();
        assert!(matches!(err, DicomError::UnsupportedTransferSyntax(_)));

        let err = recode(b"garbage", ts::EXPLICIT_VR_LITTLE_ENDIAN).unwrap_err();
        assert!(matches!(err, DicomError::NotDicom));
    }
}
