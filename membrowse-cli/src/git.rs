//! Git metadata detection: GitHub Actions environment first, `git` CLI
//! shell-out fallback otherwise.

use std::process::Command;

/// Git/GitHub provenance for one analysis, attached to an uploaded report.
#[derive(Debug, Clone, Default)]
pub struct GitMetadata {
    pub commit_sha: Option<String>,
    pub base_sha: Option<String>,
    pub branch_name: Option<String>,
    pub repo_name: Option<String>,
    pub commit_message: Option<String>,
    pub commit_timestamp: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub pr_number: Option<String>,
}

fn run_git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn current_branch() -> Option<String> {
    run_git(&["symbolic-ref", "--short", "HEAD"]).or_else(|| {
        run_git(&[
            "for-each-ref",
            "--points-at",
            "HEAD",
            "--format=%(refname:short)",
            "refs/heads/",
        ])
    })
}

fn repo_name_from_remote() -> Option<String> {
    let url = run_git(&["config", "--get", "remote.origin.url"])?;
    let trimmed = url.strip_suffix(".git").unwrap_or(&url);
    trimmed.rsplit('/').next().map(str::to_string)
}

struct PullRequestEvent {
    base_sha: Option<String>,
    branch_name: Option<String>,
    pr_number: Option<String>,
}

fn parse_pull_request_event(event: &serde_json::Value) -> PullRequestEvent {
    let pr = event.get("pull_request");
    PullRequestEvent {
        base_sha: pr
            .and_then(|p| p.get("base"))
            .and_then(|b| b.get("sha"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        branch_name: pr
            .and_then(|p| p.get("head"))
            .and_then(|h| h.get("ref"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        pr_number: pr
            .and_then(|p| p.get("number"))
            .map(|n| n.to_string()),
    }
}

fn parse_push_event(event: &serde_json::Value) -> Option<String> {
    event.get("before").and_then(|v| v.as_str()).map(str::to_string)
}

/// Reads GitHub Actions environment variables and event payload, falling
/// back to `git` CLI inspection for anything not carried by the environment.
pub fn detect_github_metadata() -> GitMetadata {
    let event_name = std::env::var("GITHUB_EVENT_NAME").unwrap_or_default();
    let mut commit_sha = std::env::var("GITHUB_SHA").ok().filter(|s| !s.is_empty());
    let event_path = std::env::var("GITHUB_EVENT_PATH").unwrap_or_default();

    let mut base_sha = None;
    let mut branch_name = None;
    let mut pr_number = None;

    if !event_path.is_empty() {
        if let Ok(contents) = std::fs::read_to_string(&event_path) {
            if let Ok(event) = serde_json::from_str::<serde_json::Value>(&contents) {
                match event_name.as_str() {
                    "pull_request" => {
                        let pr = parse_pull_request_event(&event);
                        base_sha = pr.base_sha;
                        branch_name = pr.branch_name;
                        pr_number = pr.pr_number;
                    }
                    "push" => {
                        base_sha = parse_push_event(&event);
                        branch_name = current_branch()
                            .or_else(|| std::env::var("GITHUB_REF_NAME").ok())
                            .or_else(|| Some("unknown".to_string()));
                    }
                    _ => {}
                }
            }
        }
    }

    if commit_sha.is_none() {
        commit_sha = run_git(&["rev-parse", "HEAD"]);
    }
    if branch_name.is_none() {
        branch_name = current_branch().or_else(|| Some("unknown".to_string()));
    }

    let repo_name = repo_name_from_remote().or_else(|| Some("unknown".to_string()));

    let mut commit_message = Some("Unknown commit message".to_string());
    let mut commit_timestamp = None;
    let mut author_name = Some("Unknown".to_string());
    let mut author_email = Some("unknown@example.com".to_string());

    if let Some(sha) = &commit_sha {
        if let Some(msg) = run_git(&["log", "-1", "--pretty=format:%B", sha]) {
            commit_message = Some(msg);
        }
        commit_timestamp = run_git(&["log", "-1", "--pretty=format:%cI", sha]);
        if let Some(name) = run_git(&["log", "-1", "--pretty=format:%an", sha]) {
            author_name = Some(name);
        }
        if let Some(email) = run_git(&["log", "-1", "--pretty=format:%ae", sha]) {
            author_email = Some(email);
        }
    }

    GitMetadata {
        commit_sha,
        base_sha,
        branch_name,
        repo_name,
        commit_message,
        commit_timestamp,
        author_name,
        author_email,
        pr_number,
    }
}

/// Metadata for one specific, already-known commit — used by `onboard` when
/// walking historical commits rather than inspecting the live GitHub event.
pub struct CommitMetadata {
    pub base_sha: Option<String>,
    pub commit_message: String,
    pub commit_timestamp: String,
}

pub fn commit_metadata(commit_sha: &str) -> CommitMetadata {
    CommitMetadata {
        base_sha: run_git(&["rev-parse", &format!("{commit_sha}~1")]),
        commit_message: run_git(&["log", "-1", "--pretty=format:%B", commit_sha])
            .unwrap_or_else(|| "Unknown commit message".to_string()),
        commit_timestamp: run_git(&["log", "-1", "--pretty=format:%cI", commit_sha])
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pull_request_event_fields() {
        let event = serde_json::json!({
            "pull_request": {
                "base": { "sha": "abc123" },
                "head": { "ref": "feature-branch" },
                "number": 42
            }
        });
        let pr = parse_pull_request_event(&event);
        assert_eq!(pr.base_sha.as_deref(), Some("abc123"));
        assert_eq!(pr.branch_name.as_deref(), Some("feature-branch"));
        assert_eq!(pr.pr_number.as_deref(), Some("42"));
    }

    #[test]
    fn parses_push_event_before_sha() {
        let event = serde_json::json!({ "before": "deadbeef" });
        assert_eq!(parse_push_event(&event).as_deref(), Some("deadbeef"));
    }

    #[test]
    fn missing_fields_yield_none() {
        let event = serde_json::json!({});
        let pr = parse_pull_request_event(&event);
        assert!(pr.base_sha.is_none());
        assert!(pr.branch_name.is_none());
        assert!(pr.pr_number.is_none());
    }
}
