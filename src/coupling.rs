//! Coupling Builder
//!
//! Couples scanned studies to registry subjects and events, producing the
//! coupling list the registry ingests. One study yields at most one row; the
//! first configured project whose pattern claims the patient label wins.

use std::path::Path;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::project::Project;
use crate::registry::RegistryClient;

/// Header line of the coupling list.
pub const COUPLING_HEADER: &str = "AccessionNumber,ProjectName,subjectid,eventname";

/// One coupling between a study and a registry subject/event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouplingRow {
    pub accession_number: String,
    pub project_name: String,
    pub subject_id: String,
    pub event_label: String,
}

/// Couple every scanned study to its project, creating subjects on the way.
///
/// Studies keep their scan order in the output. A registry refusal to create
/// a subject is logged but still yields a row, so the coupling list reflects
/// everything found on disk; only transport failures abort the pass.
pub async fn build_couplings(
    client: &RegistryClient,
    projects: &mut [Project],
    studies: &IndexMap<String, String>,
) -> Result<Vec<CouplingRow>> {
    let mut rows = Vec::new();
    for (label, accession) in studies {
        let mut claimed = false;
        for project in projects.iter_mut() {
            let Some(key) = project.decode(label) else {
                continue;
            };
            let confirmed = client.ensure_subject(project, &key.subject_id).await?;
            if !confirmed {
                warn!(
                    project = %project.name,
                    subject = %key.subject_id,
                    accession = %accession,
                    "writing coupling row for a subject the registry did not confirm"
                );
            }
            rows.push(CouplingRow {
                accession_number: accession.clone(),
                project_name: project.name.clone(),
                subject_id: key.subject_id,
                event_label: key.event_label,
            });
            claimed = true;
            break;
        }
        if !claimed {
            // coupling is opt-in by naming convention, unmatched is normal
            debug!(patient = %label, "no project claims this label");
        }
    }
    info!(
        rows = rows.len(),
        studies = studies.len(),
        "coupling pass complete"
    );
    Ok(rows)
}

/// Write the coupling list with CRLF line endings, header included.
///
/// Fields are identifier-shaped (hex accessions, registry ids and event
/// names) and never contain separators, so no quoting is applied.
pub fn write_coupling_file(rows: &[CouplingRow], path: &Path) -> Result<()> {
    let mut out = String::with_capacity(64 * (rows.len() + 1));
    out.push_str(COUPLING_HEADER);
    out.push_str("\r\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{}\r\n",
            row.accession_number, row.project_name, row.subject_id, row.event_label
        ));
    }
    std::fs::write(path, out)?;
    info!(file = %path.display(), rows = rows.len(), "wrote coupling list");
    Ok(())
}
