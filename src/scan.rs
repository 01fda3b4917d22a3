//! Folder Scanner
//!
//! Walks the export folder and derives one study per directory. Exports place
//! every file of a study (or series) in its own directory, so the scanner
//! reads metadata from the first parseable file of each directory and treats
//! it as the representative of all its siblings. Pixel data is never loaded.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use dicom_dictionary_std::tags;
use dicom_object::OpenFileOptions;
use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::accession::{clean_str, ensure_accession};
use crate::error::{Error, Result};

/// Identity and accession of one study, as read from a representative file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyRecord {
    /// PatientName as exported, used as the coupling key
    pub patient_identity: String,
    /// Stored or synthesized AccessionNumber
    pub accession_number: String,
}

/// Result of one scan pass over the export folder.
#[derive(Debug, Default)]
pub struct StudyScan {
    /// Patient identity to accession number, in scan order
    pub studies: IndexMap<String, String>,
    /// Directories visited
    pub directories: usize,
    /// Files skipped for lacking a DICOM preamble
    pub skipped_files: usize,
    /// Candidate files that failed to parse
    pub unreadable_files: usize,
}

/// Scan the export folder and collect the studies it holds.
///
/// Directories are visited in lexicographic order and only the first readable
/// file of each directory is consulted. A patient identity seen in more than
/// one directory keeps the accession it was first seen with.
pub fn scan_study_folder(root: &Path) -> Result<StudyScan> {
    if !root.is_dir() {
        return Err(Error::Config(format!(
            "study folder {} is not a directory",
            root.display()
        )));
    }
    info!(root = %root.display(), "scanning study folder");
    let mut scan = StudyScan::default();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "cannot read directory entry, skipping");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        scan.directories += 1;
        scan_directory(entry.path(), &mut scan);
    }

    info!(
        studies = scan.studies.len(),
        directories = scan.directories,
        skipped = scan.skipped_files,
        unreadable = scan.unreadable_files,
        "scan complete"
    );
    Ok(scan)
}

/// Read the representative file of one directory into the scan result.
fn scan_directory(dir: &Path, scan: &mut StudyScan) {
    let files = directory_files(dir);
    if files.is_empty() {
        return;
    }
    for path in files {
        match has_dicom_preamble(&path) {
            Ok(true) => {}
            Ok(false) => {
                debug!(file = %path.display(), "no DICOM preamble, skipping");
                scan.skipped_files += 1;
                continue;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "cannot read file, skipping");
                scan.skipped_files += 1;
                continue;
            }
        }
        match read_study_meta(&path) {
            Ok(record) => {
                record_study(&mut scan.studies, record, dir);
                return;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "unreadable study file, trying next");
                scan.unreadable_files += 1;
            }
        }
    }
    debug!(dir = %dir.display(), "no readable study file in directory");
}

/// Immediate files of a directory, sorted by name.
fn directory_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot list directory");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    files.sort();
    files
}

fn record_study(studies: &mut IndexMap<String, String>, record: StudyRecord, dir: &Path) {
    match studies.entry(record.patient_identity) {
        Entry::Occupied(entry) => {
            if entry.get() != &record.accession_number {
                warn!(
                    patient = %entry.key(),
                    kept = %entry.get(),
                    dropped = %record.accession_number,
                    dir = %dir.display(),
                    "patient seen again with a different accession, keeping the first"
                );
            }
        }
        Entry::Vacant(entry) => {
            info!(
                patient = %entry.key(),
                accession = %record.accession_number,
                dir = %dir.display(),
                "found study"
            );
            entry.insert(record.accession_number);
        }
    }
}

/// Read patient identity and accession from one file, header only.
fn read_study_meta(path: &Path) -> Result<StudyRecord> {
    let mut obj = OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
        .map_err(|e| Error::Dicom(e.to_string()))?;

    let patient_identity = clean_str(
        &obj.element(tags::PATIENT_NAME)
            .map_err(|_| Error::Dicom("missing PatientName".into()))?
            .to_str()
            .map_err(|e| Error::Dicom(e.to_string()))?,
    )
    .to_string();
    if patient_identity.is_empty() {
        return Err(Error::Dicom("empty PatientName".into()));
    }

    ensure_accession(&mut obj)?;
    let accession_number = clean_str(
        &obj.element(tags::ACCESSION_NUMBER)
            .map_err(|e| Error::Dicom(e.to_string()))?
            .to_str()
            .map_err(|e| Error::Dicom(e.to_string()))?,
    )
    .to_string();

    Ok(StudyRecord {
        patient_identity,
        accession_number,
    })
}

/// Check for the DICM marker at offset 128.
fn has_dicom_preamble(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 132];
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header[128..] == b"DICM"),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
