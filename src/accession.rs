//! Accession Synthesizer
//!
//! Siemens scanner exports in this workflow regularly arrive without an
//! AccessionNumber, but the registry coupling and the archive both key on it.
//! A missing accession is filled in deterministically from the study instance
//! UID, so every pass over the same study (scan, couple, transfer) derives the
//! same identifier without any shared state.

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::DefaultDicomObject;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Derive a synthetic accession number from a study instance UID.
///
/// The accession is the last 16 hex digits of the SHA-256 of the UID bytes,
/// lowercase. 16 characters is the longest value the SH value representation
/// of AccessionNumber allows.
pub fn synthesize_accession(study_instance_uid: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(study_instance_uid.as_bytes()));
    digest[digest.len() - 16..].to_string()
}

/// Ensure the object carries a non-empty AccessionNumber.
///
/// Returns `Ok(true)` when an accession was synthesized and written into the
/// object, `Ok(false)` when a usable accession was already present. Fails if
/// the object has no StudyInstanceUID to derive from.
pub fn ensure_accession(obj: &mut DefaultDicomObject) -> Result<bool> {
    // the object is fully parsed already, a lookup can only fail as absent
    let present = match obj.element(tags::ACCESSION_NUMBER).ok() {
        Some(elem) => !clean_str(
            &elem.to_str().map_err(|e| Error::Dicom(e.to_string()))?,
        )
        .is_empty(),
        None => false,
    };
    if present {
        return Ok(false);
    }

    let study_uid = clean_str(
        &obj.element(tags::STUDY_INSTANCE_UID)
            .map_err(|_| Error::Dicom("missing StudyInstanceUID".into()))?
            .to_str()
            .map_err(|e| Error::Dicom(e.to_string()))?,
    )
    .to_string();
    if study_uid.is_empty() {
        return Err(Error::Dicom("empty StudyInstanceUID".into()));
    }

    let accession = synthesize_accession(&study_uid);
    debug!(study_uid, accession, "synthesized accession number");
    obj.put(DataElement::new(
        tags::ACCESSION_NUMBER,
        VR::SH,
        PrimitiveValue::from(accession.as_str()),
    ));
    Ok(true)
}

/// Strip the trailing padding DICOM string values carry (NUL or space).
pub(crate) fn clean_str(s: &str) -> &str {
    s.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}
