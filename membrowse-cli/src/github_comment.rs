//! Posts or updates a PR comment summarizing an upload, via the `gh` CLI.
//! Gated on running inside a `pull_request` GitHub Actions event and `gh`
//! being available on `PATH`.

use std::process::Command;

const COMMENT_MARKER: &str = "<!-- membrowse-pr-comment -->";

fn gh_cli_available() -> bool {
    Command::new("gh")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn build_comment_body(comparison_url: Option<&str>) -> String {
    let mut body = vec![COMMENT_MARKER.to_string(), "## MemBrowse Memory Analysis".to_string(), String::new()];
    match comparison_url {
        Some(url) => {
            body.push(format!("[View Build Comparison]({url})"));
            body.push(String::new());
            body.push("Memory footprint analysis has been uploaded to MemBrowse.".to_string());
        }
        None => {
            body.push("Memory footprint analysis completed.".to_string());
            body.push(String::new());
            body.push("*Build comparison not available (this may be the first build for this project)*".to_string());
        }
    }
    body.join("\n")
}

fn find_existing_comment() -> Option<String> {
    let output = Command::new("gh")
        .args([
            "pr",
            "view",
            "--json",
            "comments",
            "--jq",
            &format!(".comments[] | select(.body | contains(\"{COMMENT_MARKER}\")) | .id"),
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

fn update_comment(comment_id: &str, body: &str) -> std::io::Result<()> {
    let status = Command::new("gh")
        .args([
            "api",
            "-X",
            "PATCH",
            &format!("repos/{{owner}}/{{repo}}/issues/comments/{comment_id}"),
            "-f",
            &format!("body={body}"),
        ])
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other("gh api PATCH failed"))
    }
}

fn create_comment(body: &str) -> std::io::Result<()> {
    let status = Command::new("gh").args(["pr", "comment", "--body", body]).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other("gh pr comment failed"))
    }
}

/// Posts or updates the MemBrowse PR comment. Silently does nothing outside
/// a `pull_request` event or when `gh` isn't installed — this is a
/// best-effort convenience, never a hard requirement for `summary`/`report`
/// to succeed.
pub fn post_or_update_pr_comment(comparison_url: Option<&str>) {
    let event_name = std::env::var("GITHUB_EVENT_NAME").unwrap_or_default();
    if event_name != "pull_request" {
        tracing::debug!(%event_name, "not a pull request event, skipping PR comment");
        return;
    }
    if !gh_cli_available() {
        tracing::warn!("GitHub CLI (gh) not available, skipping PR comment");
        return;
    }

    let body = build_comment_body(comparison_url);
    let result = match find_existing_comment() {
        Some(id) => update_comment(&id, &body),
        None => create_comment(&body),
    };

    match result {
        Ok(()) => tracing::info!("posted MemBrowse PR comment"),
        Err(e) => tracing::warn!(error = %e, "failed to post PR comment"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_body_with_url_includes_link() {
        let body = build_comment_body(Some("https://example.com/compare"));
        assert!(body.contains(COMMENT_MARKER));
        assert!(body.contains("https://example.com/compare"));
    }

    #[test]
    fn comment_body_without_url_notes_first_build() {
        let body = build_comment_body(None);
        assert!(body.contains("first build"));
    }
}
