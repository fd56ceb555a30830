use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::error::SyncError;

static CARD_FILE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^c(\d+)\.").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoLocation {
    Remote(String),
    Local(PathBuf),
}

impl RepoLocation {
    pub fn parse(repo: &str) -> Self {
        if repo.starts_with("http://") || repo.starts_with("https://") {
            RepoLocation::Remote(repo.to_string())
        } else {
            RepoLocation::Local(PathBuf::from(repo))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptFile {
    pub path: PathBuf,
    pub file_name: String,
}

/// Card id embedded in a script file name (`c12345.lua` → 12345).
pub fn card_id_from_filename(file_name: &str) -> Option<i64> {
    CARD_FILE_RE.captures(file_name)?.get(1)?.as_str().parse().ok()
}

/// Local root of the scripts repository. Remote repositories are cloned into
/// `clone_dir` on first use and pulled afterwards; a failed pull keeps the
/// existing checkout.
pub fn prepare_repo(location: &RepoLocation, clone_dir: &Path) -> Result<PathBuf, SyncError> {
    match location {
        RepoLocation::Local(path) => Ok(path.clone()),
        RepoLocation::Remote(url) => {
            if clone_dir.is_dir() {
                info!("Repository already cloned, pulling latest changes in {:?}", clone_dir);
                if let Err(e) = git(Command::new("git").arg("-C").arg(clone_dir).arg("pull"), "pull") {
                    warn!("{}; continuing with current files", e);
                }
            } else {
                info!("Cloning {} into {:?}", url, clone_dir);
                git(
                    Command::new("git")
                        .args(["clone", "--depth", "1", url.as_str()])
                        .arg(clone_dir),
                    "clone",
                )?;
            }
            Ok(clone_dir.to_path_buf())
        }
    }
}

fn git(cmd: &mut Command, action: &'static str) -> Result<(), SyncError> {
    let output = cmd.output().map_err(|e| SyncError::Git {
        action,
        reason: e.to_string(),
    })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(SyncError::Git {
            action,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

pub fn scripts_dir(root: &Path, subdir: &str) -> Result<PathBuf, SyncError> {
    let dir = root.join(subdir);
    if dir.is_dir() {
        Ok(dir)
    } else {
        Err(SyncError::SourceUnavailable(dir))
    }
}

/// Files with extension `ext` directly inside `dir`, sorted by file name.
pub fn list_scripts(dir: &Path, ext: &str) -> Result<Vec<ScriptFile>, SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|_| SyncError::SourceUnavailable(dir.to_path_buf()))?;
    let mut files: Vec<ScriptFile> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == ext))
        .filter_map(|path| {
            let file_name = path.file_name()?.to_string_lossy().into_owned();
            Some(ScriptFile { path, file_name })
        })
        .collect();
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}
