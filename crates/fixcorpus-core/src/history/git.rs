use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::DateTime;
use tokio::process::Command;

use super::{HistoryError, HistoryResult, HistorySource};
use crate::domain::{Commit, Side};

/// History read from a local clone through the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitHistory {
    repo_dir: PathBuf,
    repo_id: String,
}

impl GitHistory {
    /// Open the work tree at `repo_dir`. The repository id defaults to the
    /// directory name.
    pub async fn open(repo_dir: impl AsRef<Path>, repo_id: Option<&str>) -> HistoryResult<Self> {
        let repo_dir = repo_dir.as_ref().to_path_buf();
        let output = Command::new("git")
            .args(["rev-parse", "--is-inside-work-tree"])
            .current_dir(&repo_dir)
            .output()
            .await;
        match output {
            Ok(o) if o.status.success() => {}
            _ => return Err(HistoryError::NotARepository(repo_dir.display().to_string())),
        }

        let repo_id = match repo_id {
            Some(id) => id.to_string(),
            None => repo_dir
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "repo".to_string()),
        };
        Ok(Self { repo_dir, repo_id })
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Run git, returning stdout on success and `None` on a non-zero exit.
    async fn try_git(&self, args: &[&str]) -> HistoryResult<Option<Vec<u8>>> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .kill_on_drop(true)
            .output()
            .await?;
        if output.status.success() {
            Ok(Some(output.stdout))
        } else {
            tracing::debug!(
                args = %args.join(" "),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git exited non-zero"
            );
            Ok(None)
        }
    }

    async fn git(&self, args: &[&str]) -> HistoryResult<Vec<u8>> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(HistoryError::Git {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl HistorySource for GitHistory {
    fn repo_id(&self) -> &str {
        &self.repo_id
    }

    async fn candidates(&self, keywords: &[String]) -> HistoryResult<Vec<String>> {
        let greps: Vec<String> = keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| format!("--grep={k}"))
            .collect();
        if greps.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["log", "-i", "-F", "--format=%H"];
        args.extend(greps.iter().map(String::as_str));

        let stdout = self.git(&args).await?;
        let mut seen = std::collections::HashSet::new();
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::trim)
            .filter(|h| !h.is_empty() && seen.insert(h.to_string()))
            .map(str::to_string)
            .collect())
    }

    async fn commit(&self, hash: &str) -> HistoryResult<Option<Commit>> {
        let Some(meta) = self
            .try_git(&["log", "-1", "--format=%aI%x00%B", hash])
            .await?
        else {
            return Ok(None);
        };
        let meta = String::from_utf8_lossy(&meta);
        let (date, message) = meta.split_once('\0').unwrap_or((meta.as_ref(), ""));
        let timestamp =
            DateTime::parse_from_rfc3339(date.trim()).map_err(|_| HistoryError::Timestamp {
                hash: hash.to_string(),
                value: date.trim().to_string(),
            })?;

        let patch = self
            .git(&["show", "--format=", "--no-color", "--no-ext-diff", hash])
            .await?;
        let patch = String::from_utf8_lossy(&patch);

        Commit::from_patch(&self.repo_id, hash, message.trim_end(), timestamp, &patch)
            .map(Some)
            .map_err(|source| HistoryError::Patch {
                hash: hash.to_string(),
                source,
            })
    }

    async fn snapshot(&self, hash: &str, path: &str, side: Side) -> HistoryResult<Option<String>> {
        let object = match side {
            Side::Before => format!("{hash}^:{path}"),
            Side::After => format!("{hash}:{path}"),
        };
        Ok(self
            .try_git(&["show", &object])
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}
