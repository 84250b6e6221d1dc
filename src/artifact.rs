//! Workflow-artifact plumbing: locating and downloading a baseline artifact
//! left by an earlier run, and uploading this run's artifacts through the
//! Actions results service.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use walkdir::WalkDir;

use crate::error::CovgateError;
use crate::github::Client;

/// A baseline tracefile recovered from an earlier workflow run.
pub struct BaselineArtifact {
    pub path: PathBuf,
    pub run_id: u64,
    pub head_sha: String,
    pub created_at: DateTime<Utc>,
}

/// Locate the newest workflow run on `branch`, fetch its artifact named
/// `artifact_name` and unpack it under `dest_root`.
///
/// Returns `None` when the branch has no runs yet or the run carries no
/// usable artifact by that name; both are ordinary for young repositories.
/// An archive that does not hold exactly one file is an error, since the
/// artifact is expected to be a single merged tracefile.
pub fn find_baseline(
    client: &Client,
    branch: &str,
    artifact_name: &str,
    dest_root: &Path,
) -> Result<Option<BaselineArtifact>> {
    let Some(run) = client.latest_run(branch)? else {
        eprintln!("Warning: no workflow runs found on branch '{}'", branch);
        return Ok(None);
    };
    let artifacts = client.run_artifacts(run.id)?;
    let Some(artifact) = artifacts.into_iter().find(|a| a.name == artifact_name) else {
        eprintln!(
            "Warning: run {} on '{}' has no artifact named '{}'",
            run.id, branch, artifact_name
        );
        return Ok(None);
    };
    if artifact.expired {
        eprintln!(
            "Warning: artifact '{}' from run {} has expired",
            artifact_name, run.id
        );
        return Ok(None);
    }
    let bytes = client.download_artifact(artifact.id)?;
    let dest = dest_root.join(format!("{}-{}", run.id, artifact_name));
    let path = single_file(extract_zip(&bytes, &dest)?)?;
    Ok(Some(BaselineArtifact {
        path,
        run_id: run.id,
        head_sha: run.head_sha,
        created_at: run.created_at,
    }))
}

/// The artifact is a single merged tracefile by contract; anything else in
/// the archive means it was produced by something other than this tool.
fn single_file(mut files: Vec<PathBuf>) -> Result<PathBuf> {
    if files.len() != 1 {
        return Err(CovgateError::ArtifactContents { found: files.len() }.into());
    }
    Ok(files.remove(0))
}

/// Unpack a zip archive into `dest`, returning the extracted file paths.
fn extract_zip(bytes: &[u8], dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Failed to open artifact archive")?;
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut files = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("Failed to read archive entry")?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let path = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out =
            File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        io::copy(&mut entry, &mut out)?;
        files.push(path);
    }
    Ok(files)
}

/// Client for the Actions results service, which owns artifact storage for
/// the current run. The public REST API can only read artifacts, so uploads
/// go through the same twirp endpoint the official upload-artifact action
/// uses.
pub struct ArtifactUploader {
    results_url: String,
    runtime_token: String,
    run_backend_id: String,
    job_backend_id: String,
}

#[derive(Deserialize)]
struct CreateArtifactResponse {
    #[serde(default)]
    ok: bool,
    #[serde(rename = "signedUploadUrl", alias = "signed_upload_url")]
    signed_upload_url: String,
}

#[derive(Deserialize)]
struct FinalizeArtifactResponse {
    #[serde(default)]
    ok: bool,
    #[serde(rename = "artifactId", alias = "artifact_id", default)]
    artifact_id: String,
}

impl ArtifactUploader {
    /// Build an uploader from the runner-provided environment. Returns
    /// `None` outside a workflow job, where the results service variables
    /// are not set.
    pub fn from_env() -> Option<Self> {
        let runtime_token = std::env::var("ACTIONS_RUNTIME_TOKEN").ok()?;
        let results_url = std::env::var("ACTIONS_RESULTS_URL").ok()?;
        let (run_backend_id, job_backend_id) = backend_ids(&runtime_token)?;
        Some(Self {
            results_url: results_url.trim_end_matches('/').to_string(),
            runtime_token,
            run_backend_id,
            job_backend_id,
        })
    }

    /// Upload `path` (a file or a directory) as a workflow artifact named
    /// `name`. Contents are zipped first; a directory keeps its internal
    /// layout, a single file lands at the archive root.
    pub fn upload(&self, name: &str, path: &Path) -> Result<()> {
        let bytes = zip_path(path)?;
        let digest = Sha256::digest(&bytes);
        let hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

        let created: CreateArtifactResponse = self.twirp(
            "CreateArtifact",
            serde_json::json!({
                "workflowRunBackendId": self.run_backend_id,
                "workflowJobRunBackendId": self.job_backend_id,
                "name": name,
                "version": 4,
            }),
        )?;
        if !created.ok {
            bail!("Artifact service refused to create artifact '{}'", name);
        }

        let resp = ureq::put(&created.signed_upload_url)
            .set("x-ms-blob-type", "BlockBlob")
            .set("Content-Type", "application/zip")
            .send_bytes(&bytes);
        if let Err(e) = resp {
            bail!("Failed to upload artifact '{}' to storage: {}", name, e);
        }

        let finalized: FinalizeArtifactResponse = self.twirp(
            "FinalizeArtifact",
            serde_json::json!({
                "workflowRunBackendId": self.run_backend_id,
                "workflowJobRunBackendId": self.job_backend_id,
                "name": name,
                "size": bytes.len().to_string(),
                "hash": format!("sha256:{}", hash),
            }),
        )?;
        if !finalized.ok {
            bail!("Artifact service refused to finalize artifact '{}'", name);
        }
        eprintln!(
            "Uploaded artifact '{}' ({} bytes, id {})",
            name,
            bytes.len(),
            finalized.artifact_id
        );
        Ok(())
    }

    fn twirp<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = format!(
            "{}/twirp/github.actions.results.api.v1.ArtifactService/{}",
            self.results_url, method
        );
        let resp = ureq::post(&url)
            .set("Authorization", &format!("Bearer {}", self.runtime_token))
            .set("Content-Type", "application/json")
            .set("User-Agent", "covgate")
            .send_json(body);
        match resp {
            Ok(resp) => resp
                .into_json()
                .with_context(|| format!("Failed to parse {} response", method)),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                bail!(
                    "Artifact service error in {} (HTTP {}): {}",
                    method,
                    code,
                    body
                )
            }
            Err(e) => bail!("Failed to call artifact service {}: {}", method, e),
        }
    }
}

#[derive(Deserialize)]
struct TokenClaims {
    #[serde(default)]
    scp: String,
}

/// The results service scopes requests by backend run and job ids, which
/// are not exposed as environment variables. They ride in the runtime
/// token's `scp` claim as `Actions.Results:<run>:<job>`.
fn backend_ids(token: &str) -> Option<(String, String)> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
    for scope in claims.scp.split(' ') {
        let mut parts = scope.split(':');
        if parts.next() == Some("Actions.Results") {
            let run = parts.next()?;
            let job = parts.next()?;
            return Some((run.to_string(), job.to_string()));
        }
    }
    None
}

/// Zip a file or directory tree into an in-memory archive.
fn zip_path(path: &Path) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    if path.is_dir() {
        for entry in WalkDir::new(path) {
            let entry = entry.context("Failed to walk artifact directory")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(path)
                .context("Walked file outside artifact directory")?;
            let entry_name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            writer.start_file(entry_name, options)?;
            let mut file = File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?;
            io::copy(&mut file, &mut writer)?;
        }
    } else {
        let entry_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        writer.start_file(entry_name, options)?;
        let mut file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        io::copy(&mut file, &mut writer)?;
    }

    let cursor = writer.finish().context("Failed to finish artifact archive")?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn runtime_token(scp: &str) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"scp":"{}"}}"#, scp));
        format!("header.{}.signature", payload)
    }

    #[test]
    fn test_backend_ids_from_scp_claim() {
        let token = runtime_token(
            "Actions.GenerateIdToken:write Actions.Results:run-backend-1:job-backend-2",
        );
        let (run, job) = backend_ids(&token).unwrap();
        assert_eq!(run, "run-backend-1");
        assert_eq!(job, "job-backend-2");
    }

    #[test]
    fn test_backend_ids_missing_scope() {
        let token = runtime_token("Actions.GenerateIdToken:write");
        assert!(backend_ids(&token).is_none());
    }

    #[test]
    fn test_backend_ids_malformed_token() {
        assert!(backend_ids("not-a-jwt").is_none());
        assert!(backend_ids("a.%%%.c").is_none());
    }

    #[test]
    fn test_zip_directory_and_extract() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("html");
        fs::create_dir_all(src.join("css")).unwrap();
        fs::write(src.join("index.html"), "<html></html>").unwrap();
        fs::write(src.join("css").join("style.css"), "body {}").unwrap();

        let bytes = zip_path(&src).unwrap();
        let out = dir.path().join("out");
        let mut files = extract_zip(&bytes, &out).unwrap();
        files.sort();

        assert_eq!(files.len(), 2);
        assert_eq!(
            fs::read_to_string(out.join("index.html")).unwrap(),
            "<html></html>"
        );
        assert_eq!(
            fs::read_to_string(out.join("css").join("style.css")).unwrap(),
            "body {}"
        );
    }

    #[test]
    fn test_single_file_contract() {
        assert!(single_file(vec![]).is_err());
        assert!(single_file(vec![PathBuf::from("a"), PathBuf::from("b")]).is_err());
        assert_eq!(
            single_file(vec![PathBuf::from("a")]).unwrap(),
            PathBuf::from("a")
        );
        let err = single_file(vec![]).unwrap_err();
        assert!(err.to_string().contains("exactly one file"));
    }

    #[test]
    fn test_zip_single_file_lands_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("merged.info");
        fs::write(&trace, "TN:\nend_of_record\n").unwrap();

        let bytes = zip_path(&trace).unwrap();
        let out = dir.path().join("out");
        let files = extract_zip(&bytes, &out).unwrap();

        assert_eq!(files, vec![out.join("merged.info")]);
    }
}
