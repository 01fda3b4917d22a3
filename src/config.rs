//! Configuration management for studyferry
//!
//! Loads settings from a TOML file:
//!
//! ```toml
//! root_folder = "/data/export"
//! coupling_file = "/data/export/coupling_list.csv"
//!
//! [registry]
//! base_url = "https://registry.example.org/registry"
//! accept_invalid_certs = false
//! timeout_secs = 30
//!
//! [archive]
//! host = "pacs.example.org"
//! port = 104
//! called_ae_title = "ARCHIVE"
//! calling_ae_title = "STUDYFERRY"
//!
//! [[projects]]
//! name = "NDOSE"
//! pattern = 'NDOSE_(?P<subj_id>\d{4})_(?P<event_id>\d+)'
//! subject_template = "NDOSE_{subj_id}"
//! ```
//!
//! Projects are matched against patient labels in the order they appear here;
//! the first project whose pattern matches claims the study.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::project::{Project, ProjectDefinition};

/// Explicit VR Little Endian, the transfer syntax the exports are stored in.
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

/// SOP classes produced by the PET/MR exports this tool was built around.
const DEFAULT_SOP_CLASSES: [&str; 5] = [
    // PET Image Storage
    "1.2.840.10008.5.1.4.1.1.128",
    // MR Image Storage
    "1.2.840.10008.5.1.4.1.1.4",
    // Secondary Capture Image Storage
    "1.2.840.10008.5.1.4.1.1.7",
    // Enhanced SR Storage
    "1.2.840.10008.5.1.4.1.1.88.22",
    // Siemens CSA Non-Image Storage (private)
    "1.3.12.2.1107.5.9.1",
];

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Folder holding one subdirectory per exported study
    pub root_folder: PathBuf,
    /// Where the coupling list is written before upload
    #[serde(default = "default_coupling_file")]
    pub coupling_file: PathBuf,
    pub registry: RegistryConfig,
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub projects: Vec<ProjectDefinition>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Subject registry endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry's PHP endpoints
    pub base_url: String,
    /// Accept self-signed certificates (hospital-internal registries)
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// DICOM archive (store SCP) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub host: String,
    pub port: u16,
    pub called_ae_title: String,
    #[serde(default = "default_calling_ae_title")]
    pub calling_ae_title: String,
    /// Presentation contexts proposed at association time. The default list
    /// covers the SOP classes the Siemens PET/MR exports contain.
    #[serde(default = "default_presentation_contexts")]
    pub presentation_contexts: Vec<PresentationContextConfig>,
}

/// One proposed presentation context.
#[derive(Debug, Clone, Deserialize)]
pub struct PresentationContextConfig {
    pub abstract_syntax: String,
    #[serde(default = "default_transfer_syntax")]
    pub transfer_syntax: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, overridden by RUST_LOG when set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_coupling_file() -> PathBuf {
    PathBuf::from("coupling_list.csv")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_calling_ae_title() -> String {
    "STUDYFERRY".to_string()
}

fn default_transfer_syntax() -> String {
    EXPLICIT_VR_LE.to_string()
}

fn default_presentation_contexts() -> Vec<PresentationContextConfig> {
    DEFAULT_SOP_CLASSES
        .iter()
        .map(|uid| PresentationContextConfig {
            abstract_syntax: uid.to_string(),
            transfer_syntax: EXPLICIT_VR_LE.to_string(),
        })
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.projects.is_empty() {
            return Err(Error::Config("no projects configured".into()));
        }
        if self.archive.presentation_contexts.is_empty() {
            return Err(Error::Config("no presentation contexts configured".into()));
        }
        for title in [&self.archive.called_ae_title, &self.archive.calling_ae_title] {
            // PS3.8: an AE title is at most 16 characters
            if title.is_empty() || title.len() > 16 {
                return Err(Error::Config(format!("invalid AE title {title:?}")));
            }
        }
        // surface broken patterns and templates at load, not mid-pass
        for def in &self.projects {
            Project::compile(def)?;
        }
        Ok(())
    }

    /// Compile the configured project definitions, in configuration order.
    pub fn compile_projects(&self) -> Result<Vec<Project>> {
        self.projects.iter().map(Project::compile).collect()
    }
}
