//! Subject Registry Client
//!
//! Talks to the subject registry over its PHP endpoints. Subject and
//! event lists are fetched once per project at startup and cached inside the
//! [`Project`] state; subject creation updates that cache so repeated studies
//! of the same subject do not hit the registry again.

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::project::{state_from_registry, Project};

const USER_AGENT: &str = concat!("studyferry/", env!("CARGO_PKG_VERSION"));

/// Subject and event lists for one project, as served by the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Event name keyed by registry event id. Declaration order matters:
    /// the N-th value is the event a label with `event_id` N refers to.
    #[serde(default)]
    pub events: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    pub record_id: String,
}

/// Response of the subject creation endpoint. Absence of `error`, or
/// `error == 0`, means the subject exists now.
#[derive(Debug, Deserialize)]
struct CreateSubjectResponse {
    #[serde(default)]
    error: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the subject registry.
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        if config.accept_invalid_certs {
            warn!("registry certificate validation is disabled");
        }
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the subject and event lists for one project.
    pub async fn project_info(&self, project_name: &str) -> Result<ProjectInfo> {
        let url = format!("{}/infoForThisProject.php", self.base_url);
        debug!(project = project_name, "fetching project info");
        let response = self
            .http
            .get(&url)
            .query(&[("project", project_name)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Registry(format!(
                "project info for {project_name:?} failed with {status}: {}",
                body.trim()
            )));
        }
        let info: ProjectInfo = response.json().await?;
        info!(
            project = project_name,
            subjects = info.participants.len(),
            events = info.events.len(),
            "loaded project info"
        );
        Ok(info)
    }

    /// Fetch and install the registry state of one project.
    pub async fn load_project_state(&self, project: &mut Project) -> Result<()> {
        let info = self.project_info(&project.name).await?;
        project.state = state_from_registry(
            info.participants.into_iter().map(|p| p.record_id),
            info.events,
        );
        Ok(())
    }

    /// Make sure a subject exists in the registry.
    ///
    /// Returns `Ok(true)` when the subject exists (cached, created, or
    /// already present remotely) and `Ok(false)` when the registry refused
    /// the creation. A refusal leaves the cache untouched, so a later study
    /// of the same subject retries. Transport failures are errors.
    pub async fn ensure_subject(&self, project: &mut Project, subject_id: &str) -> Result<bool> {
        if project.state.subjects.contains(subject_id) {
            return Ok(true);
        }

        info!(project = %project.name, subject = subject_id, "creating subject in registry");
        let url = format!("{}/createNewName.php", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("action", "set"),
                ("project", project.name.as_str()),
                ("new_id", subject_id),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Registry(format!(
                "subject creation for {subject_id:?} failed with {status}"
            )));
        }

        let reply: CreateSubjectResponse = response.json().await?;
        match reply.error {
            Some(code) if code != 0 => {
                warn!(
                    project = %project.name,
                    subject = subject_id,
                    code,
                    message = reply.message.as_deref().unwrap_or(""),
                    "registry refused subject creation"
                );
                Ok(false)
            }
            _ => {
                debug!(
                    project = %project.name,
                    subject = subject_id,
                    message = reply.message.as_deref().unwrap_or(""),
                    "subject available"
                );
                project.state.subjects.insert(subject_id.to_string());
                Ok(true)
            }
        }
    }

    /// Upload the coupling list file to the registry.
    pub async fn upload_coupling(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "coupling_list.csv".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("fileToUpload", part);

        let url = format!("{}/upload-couplings-file.php", self.base_url);
        info!(file = %path.display(), "uploading coupling list");
        let response = self.http.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Registry(format!(
                "coupling upload failed with {status}: {}",
                body.trim()
            )));
        }
        info!(%status, reply = %body.trim(), "coupling list uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_info_parses_and_keeps_event_order() {
        // key order deliberately differs from alphabetical order
        let info: ProjectInfo = serde_json::from_str(
            r#"{
                "participants": [{"record_id": "NDOSE_5001"}, {"record_id": "NDOSE_5002"}],
                "events": {"zz_first": "baseline_arm_1", "aa_second": "followup_arm_1"}
            }"#,
        )
        .unwrap();
        assert_eq!(info.participants.len(), 2);
        let events: Vec<&String> = info.events.values().collect();
        assert_eq!(events, ["baseline_arm_1", "followup_arm_1"]);
    }

    #[test]
    fn test_project_info_tolerates_missing_fields() {
        let info: ProjectInfo = serde_json::from_str("{}").unwrap();
        assert!(info.participants.is_empty());
        assert!(info.events.is_empty());
    }

    #[test]
    fn test_create_response_error_flag() {
        let refused: CreateSubjectResponse =
            serde_json::from_str(r#"{"error": 1, "message": "name already in use"}"#).unwrap();
        assert_eq!(refused.error, Some(1));

        let ok: CreateSubjectResponse =
            serde_json::from_str(r#"{"message": "created"}"#).unwrap();
        assert_eq!(ok.error, None);

        let ok_zero: CreateSubjectResponse = serde_json::from_str(r#"{"error": 0}"#).unwrap();
        assert_eq!(ok_zero.error, Some(0));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = RegistryClient::new(&RegistryConfig {
            base_url: "https://registry.example.org/registry/".to_string(),
            accept_invalid_certs: false,
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(client.base_url, "https://registry.example.org/registry");
    }
}
