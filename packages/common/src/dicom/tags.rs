//! Tag constants for the attributes the archive projects and routes on.

use super::parser::Tag;

// File meta (group 0002, always explicit VR little endian).
pub const FILE_META_GROUP_LENGTH: Tag = Tag::new(0x0002, 0x0000);
pub const MEDIA_STORAGE_SOP_CLASS_UID: Tag = Tag::new(0x0002, 0x0002);
pub const MEDIA_STORAGE_SOP_INSTANCE_UID: Tag = Tag::new(0x0002, 0x0003);
pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
pub const SOURCE_APPLICATION_ENTITY_TITLE: Tag = Tag::new(0x0002, 0x0016);

// Patient.
pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);
pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
pub const PATIENT_BIRTH_DATE: Tag = Tag::new(0x0010, 0x0030);
pub const PATIENT_SEX: Tag = Tag::new(0x0010, 0x0040);

// Study.
pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
pub const STUDY_DATE: Tag = Tag::new(0x0008, 0x0020);
pub const STUDY_TIME: Tag = Tag::new(0x0008, 0x0030);
pub const ACCESSION_NUMBER: Tag = Tag::new(0x0008, 0x0050);
pub const REFERRING_PHYSICIAN_NAME: Tag = Tag::new(0x0008, 0x0090);
pub const STUDY_DESCRIPTION: Tag = Tag::new(0x0008, 0x1030);

// Series.
pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000E);
pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
pub const SERIES_NUMBER: Tag = Tag::new(0x0020, 0x0011);
pub const SERIES_DESCRIPTION: Tag = Tag::new(0x0008, 0x103E);
pub const BODY_PART_EXAMINED: Tag = Tag::new(0x0018, 0x0015);
pub const INSTITUTION_NAME: Tag = Tag::new(0x0008, 0x0080);
pub const STATION_NAME: Tag = Tag::new(0x0008, 0x1010);

// Instance.
pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
pub const INSTANCE_NUMBER: Tag = Tag::new(0x0020, 0x0013);
pub const NUMBER_OF_FRAMES: Tag = Tag::new(0x0028, 0x0008);

// Pixel module.
pub const SAMPLES_PER_PIXEL: Tag = Tag::new(0x0028, 0x0002);
pub const PLANAR_CONFIGURATION: Tag = Tag::new(0x0028, 0x0006);
pub const ROWS: Tag = Tag::new(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag::new(0x0028, 0x0011);
pub const BITS_ALLOCATED: Tag = Tag::new(0x0028, 0x0100);
pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);

// Item / delimitation tags used by encapsulated pixel data and sequences.
pub const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
pub const ITEM_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE00D);
pub const SEQUENCE_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE0DD);
