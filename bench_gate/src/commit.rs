//! Commit metadata of the triggering CI event.

use serde::Deserialize;
use serde_json::Value;

use crate::data::{CommitReference, CommitUser};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommitError {
    #[error("Cannot determine the commit of a '{event}' event: {reason}")]
    Unsupported { event: String, reason: String },
}

#[derive(Deserialize)]
struct HeadCommit {
    author: CommitUser,
    committer: CommitUser,
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
struct PullRequest {
    html_url: String,
    #[serde(default)]
    title: String,
    head: PullRequestHead,
}

#[derive(Deserialize)]
struct PullRequestHead {
    sha: String,
    user: PullRequestUser,
    repo: Option<PullRequestRepo>,
}

#[derive(Deserialize)]
struct PullRequestUser {
    login: String,
}

#[derive(Deserialize)]
struct PullRequestRepo {
    #[serde(default)]
    updated_at: String,
}

/// Events that carry no commit block but can still be recorded under the run id.
const RUN_EVENTS: [&str; 2] = ["schedule", "workflow_dispatch"];

/// Extracts the commit from a GitHub webhook payload.
///
/// Push payloads provide `head_commit`, pull request payloads the head of the
/// pull request. Scheduled and manually dispatched runs get a surrogate id
/// built from `run_id`.
pub fn from_github_event(
    event_name: &str,
    payload: &Value,
    run_id: Option<&str>,
) -> Result<CommitReference, CommitError> {
    let unsupported = |reason: String| CommitError::Unsupported {
        event: event_name.to_string(),
        reason,
    };

    if let Some(head_commit) = payload.get("head_commit").filter(|v| !v.is_null()) {
        let head: HeadCommit = HeadCommit::deserialize(head_commit)
            .map_err(|e| unsupported(format!("malformed head_commit: {e}")))?;
        return Ok(CommitReference {
            author: head.author,
            committer: head.committer,
            id: head.id,
            message: head.message,
            timestamp: head.timestamp,
            url: head.url,
        });
    }

    if let Some(pull_request) = payload.get("pull_request").filter(|v| !v.is_null()) {
        let pr: PullRequest = PullRequest::deserialize(pull_request)
            .map_err(|e| unsupported(format!("malformed pull_request: {e}")))?;
        let user = CommitUser {
            name: pr.head.user.login.clone(),
            email: None,
            username: Some(pr.head.user.login),
        };
        return Ok(CommitReference {
            author: user.clone(),
            committer: user,
            url: format!("{}/commits/{}", pr.html_url, pr.head.sha),
            id: pr.head.sha,
            message: pr.title,
            timestamp: pr.head.repo.map(|r| r.updated_at).unwrap_or_default(),
        });
    }

    if RUN_EVENTS.contains(&event_name) {
        let run_id = run_id.ok_or_else(|| unsupported("no run id available".to_string()))?;
        return Ok(run_commit(event_name, run_id));
    }

    Err(unsupported(
        "payload has neither head_commit nor pull_request".to_string(),
    ))
}

fn run_commit(event_name: &str, run_id: &str) -> CommitReference {
    let user = CommitUser {
        name: "github-actions".to_string(),
        email: None,
        username: None,
    };
    CommitReference {
        author: user.clone(),
        committer: user,
        id: format!("run-{run_id}"),
        message: format!("{event_name} run {run_id}"),
        timestamp: String::new(),
        url: String::new(),
    }
}

/// Commit for runs outside of CI, identified only by `id`.
pub fn local_commit(id: &str) -> CommitReference {
    let user = CommitUser {
        name: "local".to_string(),
        email: None,
        username: None,
    };
    CommitReference {
        author: user.clone(),
        committer: user,
        id: id.to_string(),
        ..Default::default()
    }
}
