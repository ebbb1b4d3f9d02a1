//! Transfer syntax UIDs and the little classification the frame extractor
//! depends on. Pixel bytes are always served at their native syntax.

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

/// Uncompressed syntaxes carry native (non-encapsulated) pixel data.
/// The deflated syntax belongs here: it is explicit VR little endian
/// with native pixel data once the stream is inflated.
pub fn is_uncompressed(uid: &str) -> bool {
    matches!(
        uid,
        IMPLICIT_VR_LITTLE_ENDIAN
            | EXPLICIT_VR_LITTLE_ENDIAN
            | EXPLICIT_VR_BIG_ENDIAN
            | DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN
    )
}

pub fn is_deflated(uid: &str) -> bool {
    uid == DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN
}

/// MPEG-2, MPEG-4 and HEVC family (1.2.840.10008.1.2.4.100 .. .108).
pub fn is_video(uid: &str) -> bool {
    let Some(rest) = uid.strip_prefix("1.2.840.10008.1.2.4.10") else {
        return false;
    };
    matches!(rest, "0" | "1" | "2" | "3" | "4" | "5" | "6" | "7" | "8")
}

pub fn is_big_endian(uid: &str) -> bool {
    uid == EXPLICIT_VR_BIG_ENDIAN
}

pub fn is_explicit_vr(uid: &str) -> bool {
    uid != IMPLICIT_VR_LITTLE_ENDIAN
}
