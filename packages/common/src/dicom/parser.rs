//! Streaming DICOM part-10 header parser.
//!
//! Reads the preamble, file meta group and main dataset from any `Read`,
//! stopping at the pixel-data element so multi-gigabyte instances never
//! have their payload pulled through the metadata path. The collected
//! element list is retained for path-template resolution and for the
//! PS3.18 JSON projection.

use std::fmt;
use std::io::Read;

use super::error::DicomError;
use super::{tags, ts};

/// Hard ceiling for a single element value held in memory. Pixel data is
/// excluded from parsing, so anything near this size is a malformed length.
const MAX_VALUE_LEN: u32 = 256 * 1024 * 1024;

const MAX_SEQUENCE_DEPTH: usize = 16;

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// A DICOM attribute tag (group, element).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    /// PS3.18 attribute key: eight uppercase hex digits.
    pub fn key(&self) -> String {
        format!("{:04X}{:04X}", self.group, self.element)
    }

    /// Parse the eight-hex-digit form used by path templates.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 8 {
            return None;
        }
        let group = u16::from_str_radix(&s[..4], 16).ok()?;
        let element = u16::from_str_radix(&s[4..], 16).ok()?;
        Some(Self::new(group, element))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Value representation codes, PS3.5 table 6.2-1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Vr {
    AE, AS, AT, CS, DA, DS, DT, FL, FD, IS, LO, LT, OB, OD, OF, OL, OW,
    PN, SH, SL, SQ, SS, ST, SV, TM, UC, UI, UL, UN, UR, US, UT, UV,
}

impl Vr {
    pub fn from_bytes(b: [u8; 2]) -> Option<Self> {
        Some(match &b {
            b"AE" => Self::AE, b"AS" => Self::AS, b"AT" => Self::AT,
            b"CS" => Self::CS, b"DA" => Self::DA, b"DS" => Self::DS,
            b"DT" => Self::DT, b"FL" => Self::FL, b"FD" => Self::FD,
            b"IS" => Self::IS, b"LO" => Self::LO, b"LT" => Self::LT,
            b"OB" => Self::OB, b"OD" => Self::OD, b"OF" => Self::OF,
            b"OL" => Self::OL, b"OW" => Self::OW, b"PN" => Self::PN,
            b"SH" => Self::SH, b"SL" => Self::SL, b"SQ" => Self::SQ,
            b"SS" => Self::SS, b"ST" => Self::ST, b"SV" => Self::SV,
            b"TM" => Self::TM, b"UC" => Self::UC, b"UI" => Self::UI,
            b"UL" => Self::UL, b"UN" => Self::UN, b"UR" => Self::UR,
            b"US" => Self::US, b"UT" => Self::UT, b"UV" => Self::UV,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AE => "AE", Self::AS => "AS", Self::AT => "AT",
            Self::CS => "CS", Self::DA => "DA", Self::DS => "DS",
            Self::DT => "DT", Self::FL => "FL", Self::FD => "FD",
            Self::IS => "IS", Self::LO => "LO", Self::LT => "LT",
            Self::OB => "OB", Self::OD => "OD", Self::OF => "OF",
            Self::OL => "OL", Self::OW => "OW", Self::PN => "PN",
            Self::SH => "SH", Self::SL => "SL", Self::SQ => "SQ",
            Self::SS => "SS", Self::ST => "ST", Self::SV => "SV",
            Self::TM => "TM", Self::UC => "UC", Self::UI => "UI",
            Self::UL => "UL", Self::UN => "UN", Self::UR => "UR",
            Self::US => "US", Self::UT => "UT", Self::UV => "UV",
        }
    }

    /// VRs encoded with a 2-byte reserved field and 4-byte length in
    /// explicit-VR syntaxes.
    pub(super) fn has_long_header(&self) -> bool {
        matches!(
            self,
            Self::OB | Self::OD | Self::OF | Self::OL | Self::OW
                | Self::SQ | Self::SV | Self::UC | Self::UN
                | Self::UR | Self::UT | Self::UV
        )
    }

    fn is_text(&self) -> bool {
        matches!(
            self,
            Self::AE | Self::AS | Self::CS | Self::DA | Self::DS | Self::DT
                | Self::IS | Self::LO | Self::LT | Self::PN | Self::SH
                | Self::ST | Self::TM | Self::UC | Self::UI | Self::UR
                | Self::UT
        )
    }
}

/// Decoded element payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementValue {
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Bytes(Vec<u8>),
    Items(Vec<Dataset>),
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataElement {
    pub tag: Tag,
    pub vr: Vr,
    pub value: ElementValue,
}

/// An ordered attribute set, as read from the stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    elements: Vec<DataElement>,
}

impl Dataset {
    pub fn push(&mut self, element: DataElement) {
        self.elements.push(element);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataElement> {
        self.elements.iter()
    }

    pub fn get(&self, tag: Tag) -> Option<&DataElement> {
        self.elements.iter().find(|e| e.tag == tag)
    }

    /// Trimmed string value, `None` when absent or empty.
    pub fn string(&self, tag: Tag) -> Option<&str> {
        match &self.get(tag)?.value {
            ElementValue::Str(s) => {
                let s = s.trim();
                if s.is_empty() { None } else { Some(s) }
            }
            _ => None,
        }
    }

    /// First integer value; decodes IS strings as well as binary VRs.
    pub fn int(&self, tag: Tag) -> Option<i64> {
        match &self.get(tag)?.value {
            ElementValue::Ints(v) => v.first().copied(),
            ElementValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Everything the ingest pipeline projects out of one instance header.
#[derive(Clone, Debug)]
pub struct DicomHeader {
    pub patient_id: String,
    /// True when the incoming object carried no PatientID and one was
    /// synthesised from the study UID.
    pub provisional_patient_id: bool,
    pub patient_name: Option<String>,
    pub patient_birth_date: Option<String>,
    pub patient_sex: Option<String>,

    pub study_uid: String,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub study_description: Option<String>,
    pub accession_number: Option<String>,
    pub referring_physician: Option<String>,

    pub series_uid: String,
    pub modality: String,
    pub series_number: Option<i32>,
    pub series_description: Option<String>,
    pub body_part: Option<String>,
    pub institution: Option<String>,
    pub station_name: Option<String>,
    pub sending_aet: Option<String>,

    pub sop_uid: String,
    pub sop_class_uid: String,
    pub instance_number: Option<i32>,
    pub transfer_syntax_uid: String,
    pub number_of_frames: u32,

    dataset: Dataset,
}

impl DicomHeader {
    /// Full pre-pixel attribute set, for path resolution and the JSON
    /// projection.
    pub fn attributes(&self) -> &Dataset {
        &self.dataset
    }
}

/// Parse the header of a part-10 stream, excluding pixel data.
pub fn parse_header<R: Read>(reader: R) -> Result<DicomHeader, DicomError> {
    let mut src = ByteSource::new(reader);
    let meta = read_file_meta(&mut src)?;

    let tsuid = meta
        .string(tags::TRANSFER_SYNTAX_UID)
        .ok_or(DicomError::MissingUid(tags::TRANSFER_SYNTAX_UID))?
        .to_string();

    let dataset = if ts::is_deflated(&tsuid) {
        // Everything after the file meta group is one raw-deflate blob of
        // explicit VR little endian elements.
        let mut inflated =
            ByteSource::new(flate2::read::DeflateDecoder::new(src.into_inner()));
        read_dataset(&mut inflated, true, false, None, 0, true)?
    } else {
        let explicit = ts::is_explicit_vr(&tsuid);
        let big = ts::is_big_endian(&tsuid);
        read_dataset(&mut src, explicit, big, None, 0, true)?
    };

    let study_uid = dataset
        .string(tags::STUDY_INSTANCE_UID)
        .ok_or(DicomError::MissingUid(tags::STUDY_INSTANCE_UID))?
        .to_string();
    let series_uid = dataset
        .string(tags::SERIES_INSTANCE_UID)
        .ok_or(DicomError::MissingUid(tags::SERIES_INSTANCE_UID))?
        .to_string();
    let sop_uid = dataset
        .string(tags::SOP_INSTANCE_UID)
        .ok_or(DicomError::MissingUid(tags::SOP_INSTANCE_UID))?
        .to_string();

    let (patient_id, provisional) = match dataset.string(tags::PATIENT_ID) {
        Some(pid) => (pid.to_string(), false),
        None => {
            let prefix: String = study_uid.chars().take(16).collect();
            (format!("NOPID_{prefix}"), true)
        }
    };

    let number_of_frames = dataset
        .int(tags::NUMBER_OF_FRAMES)
        .filter(|n| *n > 0)
        .unwrap_or(1) as u32;

    Ok(DicomHeader {
        patient_id,
        provisional_patient_id: provisional,
        patient_name: dataset.string(tags::PATIENT_NAME).map(str::to_string),
        patient_birth_date: dataset.string(tags::PATIENT_BIRTH_DATE).map(str::to_string),
        patient_sex: dataset.string(tags::PATIENT_SEX).map(str::to_string),
        study_uid,
        study_date: dataset.string(tags::STUDY_DATE).map(str::to_string),
        study_time: dataset.string(tags::STUDY_TIME).map(str::to_string),
        study_description: dataset.string(tags::STUDY_DESCRIPTION).map(str::to_string),
        accession_number: dataset.string(tags::ACCESSION_NUMBER).map(str::to_string),
        referring_physician: dataset
            .string(tags::REFERRING_PHYSICIAN_NAME)
            .map(str::to_string),
        series_uid,
        sop_uid,
        modality: dataset
            .string(tags::MODALITY)
            .unwrap_or("OT")
            .to_string(),
        series_number: dataset.int(tags::SERIES_NUMBER).map(|n| n as i32),
        series_description: dataset.string(tags::SERIES_DESCRIPTION).map(str::to_string),
        body_part: dataset.string(tags::BODY_PART_EXAMINED).map(str::to_string),
        institution: dataset.string(tags::INSTITUTION_NAME).map(str::to_string),
        station_name: dataset.string(tags::STATION_NAME).map(str::to_string),
        sending_aet: meta
            .string(tags::SOURCE_APPLICATION_ENTITY_TITLE)
            .map(str::to_string),
        sop_class_uid: dataset
            .string(tags::SOP_CLASS_UID)
            .unwrap_or_default()
            .to_string(),
        instance_number: dataset.int(tags::INSTANCE_NUMBER).map(|n| n as i32),
        transfer_syntax_uid: tsuid,
        number_of_frames,
        dataset,
    })
}

// ---------------------------------------------------------------------------
// Byte-level plumbing, shared with the frame extractor.

pub(super) struct ByteSource<R: Read> {
    inner: R,
    pos: u64,
}

impl<R: Read> ByteSource<R> {
    pub(super) fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    pub(super) fn into_inner(self) -> R {
        self.inner
    }

    pub(super) fn position(&self) -> u64 {
        self.pos
    }

    pub(super) fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DicomError> {
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Read a tag's worth of bytes, returning `None` on clean EOF at an
    /// element boundary.
    fn try_read4(&mut self) -> Result<Option<[u8; 4]>, DicomError> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = self.inner.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(DicomError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated tag",
                )));
            }
            filled += n;
        }
        self.pos += 4;
        Ok(Some(buf))
    }

    pub(super) fn read_u16(&mut self, big: bool) -> Result<u16, DicomError> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(if big {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    pub(super) fn read_u32(&mut self, big: bool) -> Result<u32, DicomError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(if big {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    pub(super) fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, DicomError> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub(super) fn copy_to<W: std::io::Write>(
        &mut self,
        len: u64,
        out: &mut W,
    ) -> Result<u64, DicomError> {
        let copied = std::io::copy(&mut (&mut self.inner).take(len), out)?;
        self.pos += copied;
        if copied != len {
            return Err(DicomError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated pixel data",
            )));
        }
        Ok(copied)
    }

    pub(super) fn skip(&mut self, len: u64) -> Result<(), DicomError> {
        let copied = std::io::copy(&mut (&mut self.inner).take(len), &mut std::io::sink())?;
        self.pos += copied;
        if copied != len {
            return Err(DicomError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated value",
            )));
        }
        Ok(())
    }

    pub(super) fn read_tag(&mut self, big: bool) -> Result<Option<Tag>, DicomError> {
        let Some(b) = self.try_read4()? else {
            return Ok(None);
        };
        let (group, element) = if big {
            (
                u16::from_be_bytes([b[0], b[1]]),
                u16::from_be_bytes([b[2], b[3]]),
            )
        } else {
            (
                u16::from_le_bytes([b[0], b[1]]),
                u16::from_le_bytes([b[2], b[3]]),
            )
        };
        Ok(Some(Tag::new(group, element)))
    }
}

pub(super) struct ElementHead {
    pub tag: Tag,
    pub vr: Vr,
    pub length: u32,
}

/// Read one element header. Delimitation tags come back with VR `UN` and
/// their literal length field.
pub(super) fn read_element_head<R: Read>(
    src: &mut ByteSource<R>,
    explicit: bool,
    big: bool,
) -> Result<Option<ElementHead>, DicomError> {
    let Some(tag) = src.read_tag(big)? else {
        return Ok(None);
    };

    // Item and delimitation tags never carry a VR, regardless of syntax.
    if tag.group == 0xFFFE {
        let length = src.read_u32(big)?;
        return Ok(Some(ElementHead {
            tag,
            vr: Vr::UN,
            length,
        }));
    }

    if explicit {
        let mut vr_bytes = [0u8; 2];
        src.read_exact(&mut vr_bytes)?;
        let vr = Vr::from_bytes(vr_bytes)
            .ok_or_else(|| DicomError::malformed(tag, "unrecognised VR"))?;
        let length = if vr.has_long_header() {
            src.skip(2)?;
            src.read_u32(big)?
        } else {
            src.read_u16(big)? as u32
        };
        Ok(Some(ElementHead { tag, vr, length }))
    } else {
        let length = src.read_u32(big)?;
        Ok(Some(ElementHead {
            tag,
            vr: implicit_vr(tag),
            length,
        }))
    }
}

/// Minimal implicit-VR dictionary covering the attributes the archive
/// projects. Unlisted tags decode as UN.
fn implicit_vr(tag: Tag) -> Vr {
    use tags::*;
    match tag {
        PATIENT_NAME | REFERRING_PHYSICIAN_NAME => Vr::PN,
        PATIENT_ID | STUDY_DESCRIPTION | SERIES_DESCRIPTION | INSTITUTION_NAME => Vr::LO,
        PATIENT_BIRTH_DATE | STUDY_DATE => Vr::DA,
        STUDY_TIME => Vr::TM,
        PATIENT_SEX | MODALITY | BODY_PART_EXAMINED => Vr::CS,
        ACCESSION_NUMBER | STATION_NAME => Vr::SH,
        STUDY_INSTANCE_UID | SERIES_INSTANCE_UID | SOP_INSTANCE_UID | SOP_CLASS_UID => Vr::UI,
        SERIES_NUMBER | INSTANCE_NUMBER | NUMBER_OF_FRAMES => Vr::IS,
        SAMPLES_PER_PIXEL | PLANAR_CONFIGURATION | ROWS | COLUMNS | BITS_ALLOCATED => Vr::US,
        PIXEL_DATA => Vr::OW,
        _ if tag.element == 0x0000 => Vr::UL,
        _ => Vr::UN,
    }
}

pub(super) struct FileMeta(Dataset);

impl FileMeta {
    pub(super) fn string(&self, tag: Tag) -> Option<&str> {
        self.0.string(tag)
    }
}

pub(super) fn read_file_meta<R: Read>(src: &mut ByteSource<R>) -> Result<FileMeta, DicomError> {
    let mut preamble = [0u8; 132];
    src.read_exact(&mut preamble)
        .map_err(|_| DicomError::NotDicom)?;
    if &preamble[128..] != b"DICM" {
        return Err(DicomError::NotDicom);
    }

    // The meta group is always explicit VR little endian and opens with
    // its own group length.
    let head = read_element_head(src, true, false)?
        .ok_or(DicomError::NotDicom)?;
    if head.tag != tags::FILE_META_GROUP_LENGTH || head.length != 4 {
        return Err(DicomError::NotDicom);
    }
    let group_len = src.read_u32(false)? as u64;

    let mut dataset = Dataset::default();
    let end = src.position() + group_len;
    while src.position() < end {
        let Some(head) = read_element_head(src, true, false)? else {
            break;
        };
        let value = read_value(src, &head, false, 0)?;
        dataset.push(DataElement {
            tag: head.tag,
            vr: head.vr,
            value,
        });
    }
    Ok(FileMeta(dataset))
}

fn read_dataset<R: Read>(
    src: &mut ByteSource<R>,
    explicit: bool,
    big: bool,
    limit: Option<u64>,
    depth: usize,
    stop_at_pixel_data: bool,
) -> Result<Dataset, DicomError> {
    if depth > MAX_SEQUENCE_DEPTH {
        return Err(DicomError::malformed(
            tags::ITEM,
            "sequence nesting too deep",
        ));
    }

    let mut dataset = Dataset::default();
    loop {
        if let Some(end) = limit
            && src.position() >= end
        {
            break;
        }
        let Some(head) = read_element_head(src, explicit, big)? else {
            break;
        };

        if head.tag == tags::ITEM_DELIMITATION || head.tag == tags::SEQUENCE_DELIMITATION {
            break;
        }
        if stop_at_pixel_data && depth == 0 && head.tag == tags::PIXEL_DATA {
            break;
        }

        if head.vr == Vr::SQ {
            let items = read_sequence_items(src, explicit, big, head.length, depth + 1)?;
            dataset.push(DataElement {
                tag: head.tag,
                vr: Vr::SQ,
                value: ElementValue::Items(items),
            });
            continue;
        }

        if head.length == UNDEFINED_LENGTH {
            // Undefined-length non-SQ element (UN private sequences). Walk
            // and discard its item structure.
            skip_undefined_length(src, big)?;
            dataset.push(DataElement {
                tag: head.tag,
                vr: head.vr,
                value: ElementValue::Empty,
            });
            continue;
        }

        let value = read_value(src, &head, big, depth)?;
        dataset.push(DataElement {
            tag: head.tag,
            vr: head.vr,
            value,
        });
    }
    Ok(dataset)
}

fn read_sequence_items<R: Read>(
    src: &mut ByteSource<R>,
    explicit: bool,
    big: bool,
    length: u32,
    depth: usize,
) -> Result<Vec<Dataset>, DicomError> {
    let mut items = Vec::new();
    let end = if length == UNDEFINED_LENGTH {
        None
    } else {
        Some(src.position() + length as u64)
    };

    loop {
        if let Some(end) = end
            && src.position() >= end
        {
            break;
        }
        let Some(head) = read_element_head(src, explicit, big)? else {
            break;
        };
        match head.tag {
            tags::SEQUENCE_DELIMITATION => break,
            tags::ITEM => {
                let item_end = if head.length == UNDEFINED_LENGTH {
                    None
                } else {
                    Some(src.position() + head.length as u64)
                };
                let item = read_dataset(src, explicit, big, item_end, depth, false)?;
                items.push(item);
            }
            other => {
                return Err(DicomError::malformed(other, "expected sequence item"));
            }
        }
    }
    Ok(items)
}

pub(super) fn skip_undefined_length<R: Read>(
    src: &mut ByteSource<R>,
    big: bool,
) -> Result<(), DicomError> {
    loop {
        let Some(tag) = src.read_tag(big)? else {
            return Ok(());
        };
        let length = src.read_u32(big)?;
        match tag {
            tags::SEQUENCE_DELIMITATION => return Ok(()),
            tags::ITEM if length == UNDEFINED_LENGTH => skip_undefined_length(src, big)?,
            tags::ITEM | tags::ITEM_DELIMITATION => src.skip(length as u64)?,
            other => {
                return Err(DicomError::malformed(other, "expected encapsulated item"));
            }
        }
    }
}

pub(super) fn read_value<R: Read>(
    src: &mut ByteSource<R>,
    head: &ElementHead,
    big: bool,
    _depth: usize,
) -> Result<ElementValue, DicomError> {
    if head.length == 0 {
        return Ok(ElementValue::Empty);
    }
    if head.length > MAX_VALUE_LEN {
        return Err(DicomError::malformed(head.tag, "implausible value length"));
    }
    let raw = src.read_vec(head.length as usize)?;

    let value = if head.vr.is_text() {
        let s = String::from_utf8_lossy(&raw);
        ElementValue::Str(s.trim_end_matches(['\0', ' ']).to_string())
    } else {
        match head.vr {
            Vr::US => ElementValue::Ints(
                chunked(&raw, 2, big, |b| u16::from_le_bytes([b[0], b[1]]) as i64, |b| {
                    u16::from_be_bytes([b[0], b[1]]) as i64
                }),
            ),
            Vr::SS => ElementValue::Ints(
                chunked(&raw, 2, big, |b| i16::from_le_bytes([b[0], b[1]]) as i64, |b| {
                    i16::from_be_bytes([b[0], b[1]]) as i64
                }),
            ),
            Vr::UL => ElementValue::Ints(
                chunked(&raw, 4, big, |b| u32::from_le_bytes(b.try_into().unwrap()) as i64, |b| {
                    u32::from_be_bytes(b.try_into().unwrap()) as i64
                }),
            ),
            Vr::SL => ElementValue::Ints(
                chunked(&raw, 4, big, |b| i32::from_le_bytes(b.try_into().unwrap()) as i64, |b| {
                    i32::from_be_bytes(b.try_into().unwrap()) as i64
                }),
            ),
            Vr::SV | Vr::UV => ElementValue::Ints(
                chunked(&raw, 8, big, |b| i64::from_le_bytes(b.try_into().unwrap()), |b| {
                    i64::from_be_bytes(b.try_into().unwrap())
                }),
            ),
            Vr::AT => ElementValue::Ints(
                chunked(&raw, 4, big, |b| {
                    ((u16::from_le_bytes([b[0], b[1]]) as i64) << 16)
                        | u16::from_le_bytes([b[2], b[3]]) as i64
                }, |b| {
                    ((u16::from_be_bytes([b[0], b[1]]) as i64) << 16)
                        | u16::from_be_bytes([b[2], b[3]]) as i64
                }),
            ),
            Vr::FL => ElementValue::Floats(
                chunked(&raw, 4, big, |b| f32::from_le_bytes(b.try_into().unwrap()) as f64, |b| {
                    f32::from_be_bytes(b.try_into().unwrap()) as f64
                }),
            ),
            Vr::FD => ElementValue::Floats(
                chunked(&raw, 8, big, |b| f64::from_le_bytes(b.try_into().unwrap()), |b| {
                    f64::from_be_bytes(b.try_into().unwrap())
                }),
            ),
            _ => ElementValue::Bytes(raw),
        }
    };
    Ok(value)
}

fn chunked<T>(
    raw: &[u8],
    width: usize,
    big: bool,
    le: impl Fn(&[u8]) -> T,
    be: impl Fn(&[u8]) -> T,
) -> Vec<T> {
    raw.chunks_exact(width)
        .map(|b| if big { be(b) } else { le(b) })
        .collect()
}

#[cfg(test)]
pub(super) mod testdata {
    //! Builders for synthesized part-10 byte streams used across the
    //! decoder tests.

    use super::super::tags;
    use super::Tag;

    pub struct FileBuilder {
        tsuid: String,
        body: Vec<u8>,
    }

    impl FileBuilder {
        pub fn new(tsuid: &str) -> Self {
            Self {
                tsuid: tsuid.to_string(),
                body: Vec::new(),
            }
        }

        fn explicit(&self) -> bool {
            self.tsuid != super::super::ts::IMPLICIT_VR_LITTLE_ENDIAN
        }

        fn big(&self) -> bool {
            self.tsuid == super::super::ts::EXPLICIT_VR_BIG_ENDIAN
        }

        fn push_u16(buf: &mut Vec<u8>, v: u16, big: bool) {
            if big {
                buf.extend_from_slice(&v.to_be_bytes());
            } else {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }

        fn push_u32(buf: &mut Vec<u8>, v: u32, big: bool) {
            if big {
                buf.extend_from_slice(&v.to_be_bytes());
            } else {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }

        pub fn element(mut self, tag: Tag, vr: &str, value: &[u8]) -> Self {
            let mut value = value.to_vec();
            if value.len() % 2 == 1 {
                value.push(if vr == "UI" { 0 } else { b' ' });
            }
            let big = self.big();
            Self::push_u16(&mut self.body, tag.group, big);
            Self::push_u16(&mut self.body, tag.element, big);
            if self.explicit() {
                self.body.extend_from_slice(vr.as_bytes());
                if matches!(vr, "OB" | "OW" | "UN" | "SQ" | "UT" | "UC" | "UR") {
                    self.body.extend_from_slice(&[0, 0]);
                    Self::push_u32(&mut self.body, value.len() as u32, big);
                } else {
                    Self::push_u16(&mut self.body, value.len() as u16, big);
                }
            } else {
                Self::push_u32(&mut self.body, value.len() as u32, big);
            }
            self.body.extend_from_slice(&value);
            self
        }

        pub fn str(self, tag: Tag, vr: &str, value: &str) -> Self {
            self.element(tag, vr, value.as_bytes())
        }

        pub fn us(mut self, tag: Tag, value: u16) -> Self {
            let big = self.big();
            let mut bytes = Vec::new();
            Self::push_u16(&mut bytes, value, big);
            self = self.element(tag, "US", &bytes);
            self
        }

        /// Append the raw pixel-data element header plus payload.
        pub fn native_pixel_data(mut self, payload: &[u8]) -> Self {
            let big = self.big();
            Self::push_u16(&mut self.body, tags::PIXEL_DATA.group, big);
            Self::push_u16(&mut self.body, tags::PIXEL_DATA.element, big);
            if self.explicit() {
                self.body.extend_from_slice(b"OW");
                self.body.extend_from_slice(&[0, 0]);
            }
            Self::push_u32(&mut self.body, payload.len() as u32, big);
            self.body.extend_from_slice(payload);
            self
        }

        /// Append encapsulated pixel data: BOT item then one item per
        /// fragment, closed with a sequence delimitation.
        pub fn encapsulated_pixel_data(mut self, fragments: &[&[u8]]) -> Self {
            Self::push_u16(&mut self.body, tags::PIXEL_DATA.group, false);
            Self::push_u16(&mut self.body, tags::PIXEL_DATA.element, false);
            self.body.extend_from_slice(b"OB");
            self.body.extend_from_slice(&[0, 0]);
            Self::push_u32(&mut self.body, 0xFFFF_FFFF, false);
            // Empty basic offset table.
            Self::push_u16(&mut self.body, tags::ITEM.group, false);
            Self::push_u16(&mut self.body, tags::ITEM.element, false);
            Self::push_u32(&mut self.body, 0, false);
            for frag in fragments {
                Self::push_u16(&mut self.body, tags::ITEM.group, false);
                Self::push_u16(&mut self.body, tags::ITEM.element, false);
                Self::push_u32(&mut self.body, frag.len() as u32, false);
                self.body.extend_from_slice(frag);
            }
            Self::push_u16(&mut self.body, tags::SEQUENCE_DELIMITATION.group, false);
            Self::push_u16(&mut self.body, tags::SEQUENCE_DELIMITATION.element, false);
            Self::push_u32(&mut self.body, 0, false);
            self
        }

        pub fn build(self) -> Vec<u8> {
            let mut meta = Vec::new();
            let mut meta_body = Vec::new();
            let ui = |buf: &mut Vec<u8>, tag: Tag, value: &str| {
                let mut v = value.as_bytes().to_vec();
                if v.len() % 2 == 1 {
                    v.push(0);
                }
                buf.extend_from_slice(&tag.group.to_le_bytes());
                buf.extend_from_slice(&tag.element.to_le_bytes());
                buf.extend_from_slice(b"UI");
                buf.extend_from_slice(&(v.len() as u16).to_le_bytes());
                buf.extend_from_slice(&v);
            };
            ui(&mut meta_body, tags::MEDIA_STORAGE_SOP_CLASS_UID, "1.2.840.10008.5.1.4.1.1.4");
            ui(&mut meta_body, tags::TRANSFER_SYNTAX_UID, &self.tsuid);

            meta.extend_from_slice(&[0u8; 128]);
            meta.extend_from_slice(b"DICM");
            meta.extend_from_slice(&tags::FILE_META_GROUP_LENGTH.group.to_le_bytes());
            meta.extend_from_slice(&tags::FILE_META_GROUP_LENGTH.element.to_le_bytes());
            meta.extend_from_slice(b"UL");
            meta.extend_from_slice(&4u16.to_le_bytes());
            meta.extend_from_slice(&(meta_body.len() as u32).to_le_bytes());
            meta.extend_from_slice(&meta_body);
            meta.extend_from_slice(&self.body);
            meta
        }
    }

    /// A minimal MR-like header with the identifiers tests rely on.
    pub fn mr_header(tsuid: &str) -> FileBuilder {
        FileBuilder::new(tsuid)
            .str(tags::SOP_CLASS_UID, "UI", "1.2.840.10008.5.1.4.1.1.4")
            .str(tags::SOP_INSTANCE_UID, "UI", "1.2.3")
            .str(tags::STUDY_DATE, "DA", "20240110")
            .str(tags::MODALITY, "CS", "MR")
            .str(tags::PATIENT_NAME, "PN", "Doe^Jane")
            .str(tags::PATIENT_ID, "LO", "P1")
            .str(tags::STUDY_INSTANCE_UID, "UI", "1.2.1")
            .str(tags::SERIES_INSTANCE_UID, "UI", "1.2.2")
            .str(tags::INSTANCE_NUMBER, "IS", "7")
    }
}

#[cfg(test)]
mod tests {
    use super::super::{tags, ts};
    use super::testdata::{FileBuilder, mr_header};
    use super::*;

    #[test]
    fn parses_explicit_little_endian_header() {
        let bytes = mr_header(ts::EXPLICIT_VR_LITTLE_ENDIAN).build();
        let header = parse_header(&bytes[..]).unwrap();

        assert_eq!(header.sop_uid, "1.2.3");
        assert_eq!(header.study_uid, "1.2.1");
        assert_eq!(header.series_uid, "1.2.2");
        assert_eq!(header.patient_id, "P1");
        assert!(!header.provisional_patient_id);
        assert_eq!(header.patient_name.as_deref(), Some("Doe^Jane"));
        assert_eq!(header.modality, "MR");
        assert_eq!(header.instance_number, Some(7));
        assert_eq!(header.number_of_frames, 1);
        assert_eq!(header.transfer_syntax_uid, ts::EXPLICIT_VR_LITTLE_ENDIAN);
    }

    #[test]
    fn parses_implicit_little_endian_header() {
        let bytes = mr_header(ts::IMPLICIT_VR_LITTLE_ENDIAN).build();
        let header = parse_header(&bytes[..]).unwrap();
        assert_eq!(header.sop_uid, "1.2.3");
        assert_eq!(header.modality, "MR");
    }

    #[test]
    fn parses_explicit_big_endian_header() {
        let bytes = mr_header(ts::EXPLICIT_VR_BIG_ENDIAN)
            .us(tags::ROWS, 256)
            .build();
        let header = parse_header(&bytes[..]).unwrap();
        assert_eq!(header.sop_uid, "1.2.3");
        assert_eq!(header.attributes().int(tags::ROWS), Some(256));
    }

    #[test]
    fn stops_before_pixel_data() {
        let bytes = mr_header(ts::EXPLICIT_VR_LITTLE_ENDIAN)
            .native_pixel_data(&vec![0xAB; 4096])
            .build();
        let header = parse_header(&bytes[..]).unwrap();
        assert!(header.attributes().get(tags::PIXEL_DATA).is_none());
    }

    #[test]
    fn missing_sop_uid_is_invalid() {
        let bytes = FileBuilder::new(ts::EXPLICIT_VR_LITTLE_ENDIAN)
            .str(tags::STUDY_INSTANCE_UID, "UI", "1.2.1")
            .str(tags::SERIES_INSTANCE_UID, "UI", "1.2.2")
            .build();
        let err = parse_header(&bytes[..]).unwrap_err();
        assert!(matches!(err, DicomError::MissingUid(t) if t == tags::SOP_INSTANCE_UID));
    }

    #[test]
    fn missing_patient_id_is_synthesised_and_provisional() {
        let bytes = FileBuilder::new(ts::EXPLICIT_VR_LITTLE_ENDIAN)
            .str(tags::SOP_INSTANCE_UID, "UI", "1.2.3")
            .str(tags::STUDY_INSTANCE_UID, "UI", "1.2.840.1.555666777888.99")
            .str(tags::SERIES_INSTANCE_UID, "UI", "1.2.2")
            .build();
        let header = parse_header(&bytes[..]).unwrap();
        assert!(header.provisional_patient_id);
        assert_eq!(header.patient_id, "NOPID_1.2.840.1.555666");
    }

    #[test]
    fn modality_defaults_to_ot() {
        let bytes = FileBuilder::new(ts::EXPLICIT_VR_LITTLE_ENDIAN)
            .str(tags::SOP_INSTANCE_UID, "UI", "1.2.3")
            .str(tags::STUDY_INSTANCE_UID, "UI", "1.2.1")
            .str(tags::SERIES_INSTANCE_UID, "UI", "1.2.2")
            .build();
        let header = parse_header(&bytes[..]).unwrap();
        assert_eq!(header.modality, "OT");
    }

    #[test]
    fn garbage_is_not_dicom() {
        let err = parse_header(&b"garbage"[..]).unwrap_err();
        assert!(matches!(err, DicomError::NotDicom));
    }

    #[test]
    fn tag_key_is_uppercase_hex() {
        assert_eq!(tags::SOP_INSTANCE_UID.key(), "00080018");
        assert_eq!(tags::PIXEL_DATA.key(), "7FE00010");
        assert_eq!(Tag::parse("7fe00010"), Some(tags::PIXEL_DATA));
        assert_eq!(Tag::parse("nope"), None);
    }
}
