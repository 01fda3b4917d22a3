//! studyferry
//!
//! Couples locally exported imaging studies to a research subject registry
//! and ships them to a DICOM archive. A run has two passes:
//!
//! 1. **Couple**: scan the export folder, match patient labels to configured
//!    projects, create missing registry subjects, and write and upload the
//!    coupling list that ties accession numbers to subjects and events.
//! 2. **Send**: store every unfinished study folder on the archive, marking
//!    each folder with a sentinel file so reruns resume where they stopped.

pub mod accession;
pub mod config;
pub mod coupling;
pub mod error;
pub mod project;
pub mod registry;
pub mod scan;
pub mod transfer;

pub use error::{Error, Result};
