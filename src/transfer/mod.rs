//! Transfer Session Manager
//!
//! Ships exported study folders to the archive, one association per pass.
//! Completion is tracked per folder with a sentinel file, so an interrupted
//! or partially failed pass resumes by rerunning: finished folders are
//! skipped, unfinished ones are sent again from the start.

pub mod scu;
pub mod session;

pub use scu::DimseSession;
pub use session::{StoreSession, StoreStatus};

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::accession::ensure_accession;
use crate::error::{Error, Result};

/// Marker file written into a folder after every member was stored.
pub const SENTINEL_FILE: &str = "complete";
/// Staging name for the sentinel, renamed into place once fully written.
const SENTINEL_TMP: &str = ".complete.tmp";

/// Outcome of one transfer pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub folders_sent: usize,
    pub folders_skipped: usize,
    pub folders_failed: usize,
    pub files_sent: usize,
}

/// Drives one transfer pass over a store session.
pub struct TransferRunner<S: StoreSession> {
    session: S,
}

impl<S: StoreSession> TransferRunner<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    /// Send every unfinished folder under `root`, then release the session.
    ///
    /// A failure inside a folder abandons that folder (no sentinel, resent on
    /// the next pass) and moves on to the next one. The session is released
    /// even when every folder failed.
    pub fn send_tree(mut self, root: &Path) -> Result<TransferReport> {
        let folders = match transfer_folders(root) {
            Ok(folders) => folders,
            Err(e) => {
                self.finish();
                return Err(e);
            }
        };

        let mut report = TransferReport::default();
        for folder in folders {
            if is_complete(&folder) {
                debug!(folder = %folder.display(), "already transferred, skipping");
                report.folders_skipped += 1;
                continue;
            }
            let files = member_files(&folder);
            info!(folder = %folder.display(), files = files.len(), "sending folder");
            match self.send_folder(&files) {
                Ok(sent) => {
                    report.folders_sent += 1;
                    report.files_sent += sent;
                    if let Err(e) = write_sentinel(&folder, sent) {
                        warn!(
                            folder = %folder.display(),
                            error = %e,
                            "folder sent but completion marker could not be written"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        folder = %folder.display(),
                        error = %e,
                        "folder transfer failed, leaving it unfinished"
                    );
                    report.folders_failed += 1;
                }
            }
        }

        self.finish();
        info!(
            folders_sent = report.folders_sent,
            folders_skipped = report.folders_skipped,
            folders_failed = report.folders_failed,
            files_sent = report.files_sent,
            "transfer pass complete"
        );
        Ok(report)
    }

    /// Send one folder's files in order, stopping at the first failure.
    fn send_folder(&mut self, files: &[PathBuf]) -> Result<usize> {
        for path in files {
            let mut object = dicom_object::open_file(path)
                .map_err(|e| Error::Dicom(format!("{}: {e}", path.display())))?;
            ensure_accession(&mut object)?;
            let status = self.session.store(&object)?;
            if !status.is_success() {
                return Err(Error::Store(status.0));
            }
            debug!(file = %path.display(), %status, "stored");
        }
        Ok(files.len())
    }

    fn finish(self) {
        if let Err(e) = self.session.release() {
            warn!(error = %e, "association release failed");
        }
    }
}

/// Candidate folders: immediate subdirectories of the root, sorted.
fn transfer_folders(root: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(root).map_err(|e| {
        Error::Config(format!("cannot list transfer root {}: {e}", root.display()))
    })?;
    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            folders.push(entry.path());
        }
    }
    folders.sort();
    Ok(folders)
}

/// All files under a folder, recursively, sorted, bookkeeping files excluded.
fn member_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder).follow_links(false).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let name = entry.file_name();
                if name == SENTINEL_FILE || name == SENTINEL_TMP {
                    continue;
                }
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(folder = %folder.display(), error = %e, "skipping unreadable entry");
            }
        }
    }
    files
}

fn is_complete(folder: &Path) -> bool {
    folder.join(SENTINEL_FILE).is_file()
}

/// Mark a folder as transferred. Written to a staging name first so a crash
/// mid-write never leaves a sentinel behind.
fn write_sentinel(folder: &Path, files_sent: usize) -> std::io::Result<()> {
    let staged = folder.join(SENTINEL_TMP);
    let body = format!(
        "{files_sent} files sent successfully at {}\n",
        chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
    );
    std::fs::write(&staged, body)?;
    std::fs::rename(&staged, folder.join(SENTINEL_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_folders_sorted_dirs_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b_folder")).unwrap();
        std::fs::create_dir(dir.path().join("a_folder")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), "x").unwrap();

        let folders = transfer_folders(dir.path()).unwrap();
        assert_eq!(
            folders,
            vec![dir.path().join("a_folder"), dir.path().join("b_folder")]
        );
    }

    #[test]
    fn test_transfer_folders_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(transfer_folders(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_member_files_recursive_sorted_without_markers() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("study");
        std::fs::create_dir_all(folder.join("series2")).unwrap();
        std::fs::write(folder.join("series2/img1"), "x").unwrap();
        std::fs::write(folder.join("img0"), "x").unwrap();
        std::fs::write(folder.join(SENTINEL_FILE), "done").unwrap();
        std::fs::write(folder.join(SENTINEL_TMP), "half").unwrap();

        let files = member_files(&folder);
        assert_eq!(
            files,
            vec![folder.join("img0"), folder.join("series2/img1")]
        );
    }

    #[test]
    fn test_sentinel_write_is_staged() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().to_path_buf();
        assert!(!is_complete(&folder));

        write_sentinel(&folder, 3).unwrap();
        assert!(is_complete(&folder));
        assert!(!folder.join(SENTINEL_TMP).exists());
        let body = std::fs::read_to_string(folder.join(SENTINEL_FILE)).unwrap();
        assert!(body.starts_with("3 files sent successfully"));
    }
}
