//! Study File Fixture Generator
//!
//! Builds minimal DICOM files so tests can exercise scanning, coupling and
//! transfer without real scanner exports.

use std::path::Path;

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};

/// Secondary Capture Image Storage
pub const SC_SOP_CLASS: &str = "1.2.840.10008.5.1.4.1.1.7";
/// Explicit VR Little Endian
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

/// Configuration for one generated study file
#[derive(Debug, Clone)]
pub struct StudyFileConfig {
    pub patient_name: String,
    pub study_instance_uid: String,
    pub sop_instance_uid: String,
    pub accession_number: Option<String>,
}

impl Default for StudyFileConfig {
    fn default() -> Self {
        Self {
            patient_name: "NDOSE_5001_1".to_string(),
            study_instance_uid: "1.2.826.0.1.3680043.2.1125.1".to_string(),
            sop_instance_uid: "1.2.826.0.1.3680043.2.1125.1.1".to_string(),
            accession_number: None,
        }
    }
}

impl StudyFileConfig {
    pub fn new(patient_name: &str, study_instance_uid: &str, sop_instance_uid: &str) -> Self {
        Self {
            patient_name: patient_name.to_string(),
            study_instance_uid: study_instance_uid.to_string(),
            sop_instance_uid: sop_instance_uid.to_string(),
            accession_number: None,
        }
    }

    pub fn with_accession(mut self, accession: &str) -> Self {
        self.accession_number = Some(accession.to_string());
        self
    }
}

/// Write a small secondary-capture file with the given identity.
pub fn write_study_file(path: &Path, config: &StudyFileConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut obj = InMemDicomObject::new_empty();
    obj.put(DataElement::new(
        tags::SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(SC_SOP_CLASS),
    ));
    obj.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(config.sop_instance_uid.as_str()),
    ));
    obj.put(DataElement::new(
        tags::STUDY_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(config.study_instance_uid.as_str()),
    ));
    obj.put(DataElement::new(
        tags::PATIENT_NAME,
        VR::PN,
        PrimitiveValue::from(config.patient_name.as_str()),
    ));
    obj.put(DataElement::new(
        tags::MODALITY,
        VR::CS,
        PrimitiveValue::from("OT"),
    ));
    if let Some(accession) = &config.accession_number {
        obj.put(DataElement::new(
            tags::ACCESSION_NUMBER,
            VR::SH,
            PrimitiveValue::from(accession.as_str()),
        ));
    }

    let file_obj = obj.with_meta(
        FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LE)
            .media_storage_sop_class_uid(SC_SOP_CLASS)
            .media_storage_sop_instance_uid(config.sop_instance_uid.as_str()),
    )?;
    file_obj.write_to_file(path)?;
    Ok(())
}

/// Write a file that starts like a DICOM file but cannot be parsed.
pub fn write_corrupt_study_file(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut bytes = vec![0u8; 128];
    bytes.extend_from_slice(b"DICM");
    bytes.extend_from_slice(&[0xff; 16]);
    std::fs::write(path, bytes)?;
    Ok(())
}
