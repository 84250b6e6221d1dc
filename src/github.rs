//! GitHub REST API access: PR comments, changed-file listing, workflow runs
//! and their artifacts.

use std::io::Read as _;

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::context::Repo;

/// Authenticated client for one repository's REST API.
pub struct Client {
    token: String,
    api_url: String,
    owner: String,
    repo: String,
}

#[derive(Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub body: Option<String>,
}

/// One entry from the branch-filtered workflow-run listing.
#[derive(Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub head_sha: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct WorkflowRunPage {
    workflow_runs: Vec<WorkflowRun>,
}

/// One entry from a run's artifact listing.
#[derive(Deserialize)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Deserialize)]
struct ArtifactPage {
    total_count: u64,
    artifacts: Vec<Artifact>,
}

#[derive(Deserialize)]
struct PullRequestFile {
    filename: String,
}

impl Client {
    pub fn new(token: &str, api_url: &str, repo: &Repo) -> Self {
        Self {
            token: token.to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            owner: repo.owner.clone(),
            repo: repo.name.clone(),
        }
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        ureq::request(method, url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", "covgate")
            .set("X-GitHub-Api-Version", "2022-11-28")
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, self.owner, self.repo, path)
    }

    /// All files touched by a pull request, in the host's listing order.
    pub fn list_pr_files(&self, pr_number: u64) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut page = 1u32;
        loop {
            let url =
                self.repo_url(&format!("/pulls/{}/files?per_page=100&page={}", pr_number, page));
            let resp = self
                .request("GET", &url)
                .call()
                .context("Failed to list pull request files")?;
            let batch: Vec<PullRequestFile> = resp
                .into_json()
                .context("Failed to parse pull request files JSON")?;
            if batch.is_empty() {
                break;
            }
            files.extend(batch.into_iter().map(|f| f.filename));
            page += 1;
        }
        Ok(files)
    }

    /// Find an existing report comment on a PR by its header marker.
    pub fn find_comment(&self, pr_number: u64, marker: &str) -> Result<Option<u64>> {
        let mut page = 1u32;
        loop {
            let url = self.repo_url(&format!(
                "/issues/{}/comments?per_page=100&page={}",
                pr_number, page
            ));
            let resp = self
                .request("GET", &url)
                .call()
                .context("Failed to list PR comments")?;
            let comments: Vec<IssueComment> =
                resp.into_json().context("Failed to parse comments JSON")?;
            if comments.is_empty() {
                break;
            }
            if let Some(id) = match_comment(&comments, marker) {
                return Ok(Some(id));
            }
            page += 1;
        }
        Ok(None)
    }

    pub fn create_comment(&self, pr_number: u64, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("/issues/{}/comments", pr_number));
        let resp = self
            .request("POST", &url)
            .send_json(serde_json::json!({ "body": body }));
        check_write(resp, "creating comment")
    }

    pub fn update_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("/issues/comments/{}", comment_id));
        let resp = self
            .request("PATCH", &url)
            .send_json(serde_json::json!({ "body": body }));
        check_write(resp, "updating comment")
    }

    /// Most recent workflow run on a branch. The listing is ordered
    /// newest-first by the host, so a single entry suffices.
    pub fn latest_run(&self, branch: &str) -> Result<Option<WorkflowRun>> {
        let url = runs_url(&self.repo_url("/actions/runs"), branch)?;
        let resp = self
            .request("GET", &url)
            .call()
            .context("Failed to list workflow runs")?;
        let page: WorkflowRunPage = resp
            .into_json()
            .context("Failed to parse workflow runs JSON")?;
        Ok(page.workflow_runs.into_iter().next())
    }

    /// Artifacts attached to one specific workflow run, across pages.
    /// Scoping by run id is what makes baseline lookup work from a
    /// different run than the one that produced the artifact.
    pub fn run_artifacts(&self, run_id: u64) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        let mut page = 1u32;
        loop {
            let url = self.repo_url(&format!(
                "/actions/runs/{}/artifacts?per_page=100&page={}",
                run_id, page
            ));
            let resp = self
                .request("GET", &url)
                .call()
                .context("Failed to list run artifacts")?;
            let batch: ArtifactPage =
                resp.into_json().context("Failed to parse artifacts JSON")?;
            if batch.artifacts.is_empty() {
                break;
            }
            artifacts.extend(batch.artifacts);
            if artifacts.len() as u64 >= batch.total_count {
                break;
            }
            page += 1;
        }
        Ok(artifacts)
    }

    /// Download an artifact archive (zip). The endpoint answers with a
    /// redirect to a short-lived storage URL; that hop is made without the
    /// Authorization header so the storage host never sees the token.
    pub fn download_artifact(&self, artifact_id: u64) -> Result<Vec<u8>> {
        let url = self.repo_url(&format!("/actions/artifacts/{}/zip", artifact_id));
        let agent = ureq::AgentBuilder::new().redirects(0).build();
        let resp = agent
            .request("GET", &url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", "covgate")
            .set("X-GitHub-Api-Version", "2022-11-28")
            .call()
            .context("Failed to request artifact download")?;
        let resp = if (300..400).contains(&resp.status()) {
            let location = resp
                .header("Location")
                .context("Artifact download redirect carried no Location header")?
                .to_string();
            ureq::get(&location)
                .set("User-Agent", "covgate")
                .call()
                .context("Failed to download artifact archive")?
        } else {
            resp
        };
        let mut bytes = Vec::new();
        resp.into_reader()
            .read_to_end(&mut bytes)
            .context("Failed to read artifact archive")?;
        Ok(bytes)
    }
}

/// Branch-filtered run listing URL. Branch names can carry query-delimiter
/// characters (`&`, `#`, spaces), so the filter value is percent-encoded
/// rather than interpolated.
fn runs_url(base: &str, branch: &str) -> Result<String> {
    let mut url =
        url::Url::parse(base).with_context(|| format!("Invalid API URL {}", base))?;
    let mut query = url.query_pairs_mut();
    query.append_pair("branch", branch);
    query.append_pair("per_page", "1");
    drop(query);
    Ok(url.to_string())
}

/// First comment whose body contains the marker substring.
fn match_comment(comments: &[IssueComment], marker: &str) -> Option<u64> {
    comments
        .iter()
        .find(|c| c.body.as_deref().is_some_and(|b| b.contains(marker)))
        .map(|c| c.id)
}

fn check_write(
    resp: std::result::Result<ureq::Response, ureq::Error>,
    action: &str,
) -> Result<()> {
    match resp {
        Ok(_) => Ok(()),
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            bail!("GitHub API error {} (HTTP {}): {}", action, code, body)
        }
        Err(e) => bail!("Failed {}: {}", action, e),
    }
}

/// Create or update the report comment on a pull request.
///
/// In update mode the existing comment carrying `marker` is changed in
/// place, keeping its position in the thread, so repeated runs converge on
/// a single comment. Otherwise (or when no marked comment exists yet) a new
/// comment is created.
pub fn publish(
    client: &Client,
    pr_number: u64,
    body: &str,
    marker: &str,
    update: bool,
) -> Result<()> {
    if update {
        if let Some(comment_id) = client.find_comment(pr_number, marker)? {
            client.update_comment(comment_id, body)?;
            eprintln!("Updated report comment {} on PR #{}", comment_id, pr_number);
            return Ok(());
        }
    }
    client.create_comment(pr_number, body)?;
    eprintln!("Comment posted to PR #{}", pr_number);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: u64, body: Option<&str>) -> IssueComment {
        IssueComment {
            id,
            body: body.map(|b| b.to_string()),
        }
    }

    #[test]
    fn test_match_comment_finds_first_marked() {
        let comments = vec![
            comment(1, Some("unrelated")),
            comment(2, Some("### Coverage report\nbody")),
            comment(3, Some("### Coverage report\nolder duplicate")),
        ];
        assert_eq!(match_comment(&comments, "### Coverage report"), Some(2));
    }

    #[test]
    fn test_match_comment_skips_bodyless() {
        let comments = vec![comment(1, None), comment(2, Some("### Coverage report"))];
        assert_eq!(match_comment(&comments, "### Coverage report"), Some(2));
    }

    #[test]
    fn test_match_comment_none() {
        let comments = vec![comment(1, Some("hello")), comment(2, None)];
        assert_eq!(match_comment(&comments, "### Coverage report"), None);
    }

    #[test]
    fn test_runs_url_encodes_branch() {
        let base = "https://api.github.com/repos/o/r/actions/runs";
        assert_eq!(
            runs_url(base, "main").unwrap(),
            format!("{}?branch=main&per_page=1", base)
        );
        assert_eq!(
            runs_url(base, "feat/a&b #2").unwrap(),
            format!("{}?branch=feat%2Fa%26b+%232&per_page=1", base)
        );
    }

    #[test]
    fn test_match_comment_marker_anywhere_in_body() {
        // Marker search is substring-based: a quoted marker inside another
        // comment would match first, which is why the marker embeds the
        // title prefix rather than generic words alone.
        let comments = vec![comment(7, Some("prefix text\n### Coverage report\ntail"))];
        assert_eq!(match_comment(&comments, "### Coverage report"), Some(7));
    }
}
