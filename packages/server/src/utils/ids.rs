//! Public identifiers for patients and studies.
//!
//! Field-collected DICOM UIDs are not globally unique, so rows are keyed
//! by a hash that folds the raw patient id in: two patients sharing a
//! study UID still get two study rows.

use sha1::{Digest, Sha1};

/// `SHA1(raw patient id)` as lowercase hex.
pub fn patient_public_id(raw_patient_id: &str) -> String {
    hex::encode(Sha1::digest(raw_patient_id.as_bytes()))
}

/// `SHA1(raw patient id || "|" || study UID)` as lowercase hex.
pub fn study_public_id(raw_patient_id: &str, study_uid: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(raw_patient_id.as_bytes());
    hasher.update(b"|");
    hasher.update(study_uid.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patient_id_is_sha1_hex() {
        // sha1("P1")
        assert_eq!(patient_public_id("P1"), "bdaf1eca33d4619e80e8ca689a1b74a4febbbb29");
    }

    #[test]
    fn study_id_separates_pid_and_uid() {
        // sha1("P1|1.2")
        assert_eq!(
            study_public_id("P1", "1.2"),
            "4dc51e1b199e08be45155f4aac9120c5469611e4"
        );
        let a = study_public_id("P1", "1.2");
        let b = study_public_id("P2", "1.2");
        let c = study_public_id("P1", "1.2");
        assert_ne!(a, b);
        assert_eq!(a, c);
        // The separator prevents ("P1", "2.3") colliding with ("P12", ".3").
        assert_ne!(study_public_id("P1", "2.3"), study_public_id("P12", ".3"));
    }
}
