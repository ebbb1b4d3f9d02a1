//! WADO-RS frame extraction: streams the selected frame's pixel bytes out
//! of a part-10 container in a single pass, at the native transfer syntax.

use std::io::{Read, Write};

use super::error::DicomError;
use super::parser::{
    ByteSource, Dataset, DataElement, ElementHead, Vr, read_element_head, read_file_meta,
    read_value, skip_undefined_length,
};
use super::{tags, ts};

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// How the pixel-data element must be navigated for a given instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    UncompressedSingle,
    CompressedSingle,
    UncompressedMulti,
    CompressedMulti,
    Video,
}

impl FrameKind {
    /// Classification by transfer syntax and frame count. Video syntaxes
    /// are one continuous bitstream regardless of the frame count.
    pub fn classify(tsuid: &str, frames: u32) -> Self {
        if ts::is_video(tsuid) {
            Self::Video
        } else if ts::is_uncompressed(tsuid) {
            if frames > 1 {
                Self::UncompressedMulti
            } else {
                Self::UncompressedSingle
            }
        } else if frames > 1 {
            Self::CompressedMulti
        } else {
            Self::CompressedSingle
        }
    }
}

/// Extract one frame (1-based) from a stream positioned at file start,
/// writing the raw pixel bytes to `out`. Returns the byte count written.
pub fn extract_frame<R: Read, W: Write>(
    reader: R,
    frame_number: u32,
    kind: FrameKind,
    out: &mut W,
) -> Result<u64, DicomError> {
    if frame_number == 0 {
        return Err(DicomError::FrameOutOfRange {
            requested: frame_number,
            available: 0,
        });
    }

    let mut src = ByteSource::new(reader);
    let meta = read_file_meta(&mut src)?;
    let tsuid = meta
        .string(tags::TRANSFER_SYNTAX_UID)
        .ok_or(DicomError::MissingUid(tags::TRANSFER_SYNTAX_UID))?
        .to_string();

    if ts::is_deflated(&tsuid) {
        // Inflate on the fly; the inner stream is explicit VR little
        // endian with native pixel data.
        let mut inflated =
            ByteSource::new(flate2::read::DeflateDecoder::new(src.into_inner()));
        return extract_from_dataset(&mut inflated, true, false, frame_number, kind, out);
    }
    let explicit = ts::is_explicit_vr(&tsuid);
    let big = ts::is_big_endian(&tsuid);
    extract_from_dataset(&mut src, explicit, big, frame_number, kind, out)
}

fn extract_from_dataset<R: Read, W: Write>(
    src: &mut ByteSource<R>,
    explicit: bool,
    big: bool,
    frame_number: u32,
    kind: FrameKind,
    out: &mut W,
) -> Result<u64, DicomError> {
    let (geometry, pixel) = seek_pixel_data(src, explicit, big)?;

    match kind {
        FrameKind::UncompressedSingle => {
            if pixel.length == UNDEFINED_LENGTH {
                return Err(DicomError::malformed(
                    tags::PIXEL_DATA,
                    "expected native pixel data",
                ));
            }
            if frame_number > 1 {
                return Err(DicomError::FrameOutOfRange {
                    requested: frame_number,
                    available: 1,
                });
            }
            copy_exact(src, pixel.length as u64, out)
        }
        FrameKind::UncompressedMulti => {
            extract_native_frame(src, &geometry, frame_number, pixel.length, out)
        }
        FrameKind::CompressedSingle | FrameKind::Video => {
            if pixel.length != UNDEFINED_LENGTH {
                return Err(DicomError::malformed(
                    tags::PIXEL_DATA,
                    "expected encapsulated pixel data",
                ));
            }
            if frame_number > 1 && kind == FrameKind::CompressedSingle {
                return Err(DicomError::FrameOutOfRange {
                    requested: frame_number,
                    available: 1,
                });
            }
            concat_fragments(src, big, out)
        }
        FrameKind::CompressedMulti => {
            if pixel.length != UNDEFINED_LENGTH {
                return Err(DicomError::malformed(
                    tags::PIXEL_DATA,
                    "expected encapsulated pixel data",
                ));
            }
            extract_fragment(src, big, frame_number, out)
        }
    }
}

struct Geometry(Dataset);

impl Geometry {
    fn u32_of(&self, tag: super::parser::Tag) -> Option<u32> {
        self.0.int(tag).filter(|v| *v >= 0).map(|v| v as u32)
    }

    /// rows x columns x bytes-per-sample x samples-per-pixel. Planar
    /// configuration reorders samples within the frame without changing
    /// its length.
    fn frame_length(&self) -> Result<u64, DicomError> {
        let rows = self
            .u32_of(tags::ROWS)
            .ok_or_else(|| DicomError::malformed(tags::ROWS, "missing"))?;
        let cols = self
            .u32_of(tags::COLUMNS)
            .ok_or_else(|| DicomError::malformed(tags::COLUMNS, "missing"))?;
        let bits = self.u32_of(tags::BITS_ALLOCATED).unwrap_or(8);
        let samples = self.u32_of(tags::SAMPLES_PER_PIXEL).unwrap_or(1);
        let len = rows as u64 * cols as u64 * (bits as u64 / 8).max(1) * samples as u64;
        if len == 0 {
            return Err(DicomError::malformed(tags::ROWS, "zero-length frame"));
        }
        Ok(len)
    }

    fn total_frames(&self) -> u32 {
        self.u32_of(tags::NUMBER_OF_FRAMES).filter(|n| *n > 0).unwrap_or(1)
    }
}

/// Walk the dataset collecting pixel-module geometry, stopping with the
/// stream positioned at the first byte after the pixel-data element header.
fn seek_pixel_data<R: Read>(
    src: &mut ByteSource<R>,
    explicit: bool,
    big: bool,
) -> Result<(Geometry, ElementHead), DicomError> {
    let mut geometry = Dataset::default();
    loop {
        let Some(head) = read_element_head(src, explicit, big)? else {
            return Err(DicomError::NoPixelData);
        };
        if head.tag == tags::PIXEL_DATA {
            return Ok((Geometry(geometry), head));
        }

        let wanted = matches!(
            head.tag,
            tags::ROWS
                | tags::COLUMNS
                | tags::BITS_ALLOCATED
                | tags::SAMPLES_PER_PIXEL
                | tags::PLANAR_CONFIGURATION
                | tags::NUMBER_OF_FRAMES
        );
        if wanted && head.length != UNDEFINED_LENGTH {
            let value = read_value(src, &head, big, 0)?;
            geometry.push(DataElement {
                tag: head.tag,
                vr: head.vr,
                value,
            });
        } else if head.vr == Vr::SQ || head.length == UNDEFINED_LENGTH {
            skip_undefined_or_sequence(src, explicit, big, head.length)?;
        } else {
            src.skip(head.length as u64)?;
        }
    }
}

fn skip_undefined_or_sequence<R: Read>(
    src: &mut ByteSource<R>,
    _explicit: bool,
    big: bool,
    length: u32,
) -> Result<(), DicomError> {
    if length == UNDEFINED_LENGTH {
        skip_undefined_length(src, big)
    } else {
        src.skip(length as u64)
    }
}

fn copy_exact<R: Read, W: Write>(
    src: &mut ByteSource<R>,
    len: u64,
    out: &mut W,
) -> Result<u64, DicomError> {
    src.copy_to(len, out)
}

fn extract_native_frame<R: Read, W: Write>(
    src: &mut ByteSource<R>,
    geometry: &Geometry,
    frame_number: u32,
    pixel_length: u32,
    out: &mut W,
) -> Result<u64, DicomError> {
    if pixel_length == UNDEFINED_LENGTH {
        return Err(DicomError::malformed(
            tags::PIXEL_DATA,
            "expected native pixel data",
        ));
    }
    let total = geometry.total_frames();
    if frame_number > total {
        return Err(DicomError::FrameOutOfRange {
            requested: frame_number,
            available: total,
        });
    }
    let frame_len = geometry.frame_length()?;
    let offset = (frame_number as u64 - 1) * frame_len;
    if offset + frame_len > pixel_length as u64 {
        return Err(DicomError::FrameOutOfRange {
            requested: frame_number,
            available: (pixel_length as u64 / frame_len) as u32,
        });
    }
    src.skip(offset)?;
    src.copy_to(frame_len, out)
}

/// Skip the basic offset table, then concatenate every remaining fragment
/// until the delimitation item.
fn concat_fragments<R: Read, W: Write>(
    src: &mut ByteSource<R>,
    big: bool,
    out: &mut W,
) -> Result<u64, DicomError> {
    skip_offset_table(src, big)?;
    let mut written = 0u64;
    while let Some(len) = next_fragment(src, big)? {
        written += src.copy_to(len as u64, out)?;
    }
    Ok(written)
}

/// Skip the BOT and `frame_number - 1` fragments, then emit the target
/// fragment. Conformant encoders write one fragment per frame.
fn extract_fragment<R: Read, W: Write>(
    src: &mut ByteSource<R>,
    big: bool,
    frame_number: u32,
    out: &mut W,
) -> Result<u64, DicomError> {
    skip_offset_table(src, big)?;
    let mut seen = 0u32;
    while let Some(len) = next_fragment(src, big)? {
        seen += 1;
        if seen == frame_number {
            return src.copy_to(len as u64, out);
        }
        src.skip(len as u64)?;
    }
    Err(DicomError::FrameOutOfRange {
        requested: frame_number,
        available: seen,
    })
}

fn skip_offset_table<R: Read>(src: &mut ByteSource<R>, big: bool) -> Result<(), DicomError> {
    match next_fragment(src, big)? {
        Some(len) => src.skip(len as u64),
        None => Err(DicomError::malformed(
            tags::PIXEL_DATA,
            "missing basic offset table item",
        )),
    }
}

/// Read the next item header inside encapsulated pixel data. `None` once a
/// delimitation tag closes the sequence.
fn next_fragment<R: Read>(
    src: &mut ByteSource<R>,
    big: bool,
) -> Result<Option<u32>, DicomError> {
    let Some(tag) = src.read_tag(big)? else {
        return Ok(None);
    };
    let length = src.read_u32(big)?;
    match tag {
        tags::ITEM => Ok(Some(length)),
        // Field data occasionally closes the sequence with the item form.
        tags::SEQUENCE_DELIMITATION | tags::ITEM_DELIMITATION => Ok(None),
        other => Err(DicomError::malformed(other, "expected pixel-data item")),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::testdata::mr_header;
    use super::super::tags;
    use super::super::ts;
    use super::*;

    const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
    const MPEG4: &str = "1.2.840.10008.1.2.4.102";

    #[test]
    fn classification_table() {
        use FrameKind::*;
        assert_eq!(FrameKind::classify(ts::IMPLICIT_VR_LITTLE_ENDIAN, 1), UncompressedSingle);
        assert_eq!(FrameKind::classify(ts::EXPLICIT_VR_LITTLE_ENDIAN, 20), UncompressedMulti);
        assert_eq!(FrameKind::classify(ts::EXPLICIT_VR_BIG_ENDIAN, 1), UncompressedSingle);
        assert_eq!(FrameKind::classify(MPEG4, 1), Video);
        assert_eq!(FrameKind::classify(MPEG4, 300), Video);
        assert_eq!(FrameKind::classify(JPEG_BASELINE, 1), CompressedSingle);
        assert_eq!(FrameKind::classify(JPEG_BASELINE, 5), CompressedMulti);
    }

    #[test]
    fn native_single_frame_copies_whole_element() {
        let payload: Vec<u8> = (0..64u8).collect();
        let bytes = mr_header(ts::EXPLICIT_VR_LITTLE_ENDIAN)
            .us(tags::ROWS, 8)
            .us(tags::COLUMNS, 8)
            .us(tags::BITS_ALLOCATED, 8)
            .us(tags::SAMPLES_PER_PIXEL, 1)
            .native_pixel_data(&payload)
            .build();

        let mut out = Vec::new();
        let n = extract_frame(&bytes[..], 1, FrameKind::UncompressedSingle, &mut out).unwrap();
        assert_eq!(n, 64);
        assert_eq!(out, payload);
    }

    #[test]
    fn native_multi_frame_addresses_by_offset() {
        // 3 frames of 4x4x8bit.
        let payload: Vec<u8> = (0..48u8).collect();
        let bytes = mr_header(ts::EXPLICIT_VR_LITTLE_ENDIAN)
            .str(tags::NUMBER_OF_FRAMES, "IS", "3")
            .us(tags::ROWS, 4)
            .us(tags::COLUMNS, 4)
            .us(tags::BITS_ALLOCATED, 8)
            .us(tags::SAMPLES_PER_PIXEL, 1)
            .native_pixel_data(&payload)
            .build();

        let mut out = Vec::new();
        extract_frame(&bytes[..], 2, FrameKind::UncompressedMulti, &mut out).unwrap();
        assert_eq!(out, &payload[16..32]);
    }

    #[test]
    fn native_multi_frame_out_of_range() {
        let payload = vec![0u8; 48];
        let bytes = mr_header(ts::EXPLICIT_VR_LITTLE_ENDIAN)
            .str(tags::NUMBER_OF_FRAMES, "IS", "3")
            .us(tags::ROWS, 4)
            .us(tags::COLUMNS, 4)
            .us(tags::BITS_ALLOCATED, 8)
            .us(tags::SAMPLES_PER_PIXEL, 1)
            .native_pixel_data(&payload)
            .build();

        let mut out = Vec::new();
        let err = extract_frame(&bytes[..], 4, FrameKind::UncompressedMulti, &mut out).unwrap_err();
        assert!(matches!(
            err,
            DicomError::FrameOutOfRange { requested: 4, available: 3 }
        ));

        let err = extract_frame(&bytes[..], 0, FrameKind::UncompressedMulti, &mut out).unwrap_err();
        assert!(matches!(err, DicomError::FrameOutOfRange { requested: 0, .. }));
    }

    #[test]
    fn encapsulated_multi_frame_selects_fragment() {
        let f1 = vec![1u8; 10];
        let f2 = vec![2u8; 14];
        let f3 = vec![3u8; 6];
        let bytes = mr_header(JPEG_BASELINE)
            .str(tags::NUMBER_OF_FRAMES, "IS", "3")
            .encapsulated_pixel_data(&[&f1, &f2, &f3])
            .build();

        let mut out = Vec::new();
        extract_frame(&bytes[..], 2, FrameKind::CompressedMulti, &mut out).unwrap();
        assert_eq!(out, f2);

        let mut out = Vec::new();
        let err = extract_frame(&bytes[..], 4, FrameKind::CompressedMulti, &mut out).unwrap_err();
        assert!(matches!(
            err,
            DicomError::FrameOutOfRange { requested: 4, available: 3 }
        ));
    }

    #[test]
    fn encapsulated_single_frame_concatenates_fragments() {
        let f1 = vec![7u8; 12];
        let f2 = vec![9u8; 8];
        let bytes = mr_header(JPEG_BASELINE)
            .encapsulated_pixel_data(&[&f1, &f2])
            .build();

        let mut out = Vec::new();
        let n = extract_frame(&bytes[..], 1, FrameKind::CompressedSingle, &mut out).unwrap();
        assert_eq!(n, 20);
        assert_eq!(&out[..12], &f1[..]);
        assert_eq!(&out[12..], &f2[..]);
    }

    #[test]
    fn extraction_is_idempotent() {
        let f1 = vec![5u8; 9];
        let bytes = mr_header(JPEG_BASELINE)
            .encapsulated_pixel_data(&[&f1])
            .build();

        let mut a = Vec::new();
        let mut b = Vec::new();
        extract_frame(&bytes[..], 1, FrameKind::CompressedSingle, &mut a).unwrap();
        extract_frame(&bytes[..], 1, FrameKind::CompressedSingle, &mut b).unwrap();
        assert_eq!(a, b);
    }
}
