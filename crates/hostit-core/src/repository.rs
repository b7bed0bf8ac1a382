//! Source-control push events.

use serde::{Deserialize, Serialize};

/// Parsed push event data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub r#ref: String,
    pub after: String,
    pub repository_full_name: String,
    pub default_branch: String,
    /// URL the build job clones from.
    pub clone_url: String,
    pub branch: Option<String>,
    pub commits: Vec<CommitInfo>,
    pub head_commit: Option<CommitInfo>,
    pub pusher: String,
}

/// Commit information from a push event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    pub author: String,
}

impl PushEvent {
    /// Parse a GitHub push webhook payload
    pub fn from_github_payload(payload: &serde_json::Value) -> Option<Self> {
        let r#ref = payload.get("ref")?.as_str()?.to_string();
        let after = payload.get("after")?.as_str()?.to_string();
        let repository = payload.get("repository")?;
        let repository_full_name = repository.get("full_name")?.as_str()?.to_string();
        let default_branch = repository
            .get("default_branch")
            .and_then(|b| b.as_str())
            .unwrap_or("main")
            .to_string();

        let clone_url = repository
            .get("clone_url")
            .or_else(|| repository.get("html_url"))
            .and_then(|u| u.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("https://github.com/{}.git", repository_full_name));

        let branch = r#ref.strip_prefix("refs/heads/").map(String::from);

        let commits = payload
            .get("commits")
            .and_then(|c| c.as_array())
            .map(|arr| arr.iter().filter_map(CommitInfo::from_github_commit).collect())
            .unwrap_or_default();

        let head_commit = payload
            .get("head_commit")
            .and_then(CommitInfo::from_github_commit);

        let pusher = payload
            .get("pusher")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown")
            .to_string();

        Some(PushEvent {
            r#ref,
            after,
            repository_full_name,
            default_branch,
            clone_url,
            branch,
            commits,
            head_commit,
            pusher,
        })
    }

    /// Whether the push updated the repository's default branch.
    pub fn targets_default_branch(&self) -> bool {
        self.branch.as_deref() == Some(self.default_branch.as_str())
    }

    /// Message of the newest commit in the push.
    pub fn latest_commit_message(&self) -> String {
        self.commits
            .last()
            .or(self.head_commit.as_ref())
            .map(|c| c.message.clone())
            .unwrap_or_else(|| "No message".to_string())
    }
}

impl CommitInfo {
    fn from_github_commit(value: &serde_json::Value) -> Option<Self> {
        Some(CommitInfo {
            sha: value.get("id")?.as_str()?.to_string(),
            message: value.get("message")?.as_str()?.to_string(),
            author: value
                .get("author")
                .and_then(|a| a.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or("unknown")
                .to_string(),
        })
    }
}
