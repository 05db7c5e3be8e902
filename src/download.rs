use crate::error::{Error, Result};
use crate::poll::ResultArtifact;
use crate::session::Session;
use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::path::{Component, Path, PathBuf};
use std::pin::pin;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

#[derive(Debug, PartialEq, Eq)]
pub enum ArtifactOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    Skipped { path: PathBuf },
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<Error>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, outcome: ArtifactOutcome) {
        match outcome {
            ArtifactOutcome::Downloaded { path, .. } => self.downloaded.push(path),
            ArtifactOutcome::Skipped { path } => self.skipped.push(path),
        }
    }
}

/// Downloads every artifact into `output_dir`. A failed artifact is logged and
/// recorded in the report; the remaining artifacts are still attempted.
pub async fn download_results(
    session: &Session,
    results: &[ResultArtifact],
    output_dir: &Path,
    overwrite: bool,
) -> DownloadReport {
    log::info!("{} items to download", results.len());
    let mut report = DownloadReport::default();

    for artifact in results {
        match download_artifact(session, artifact, output_dir, overwrite).await {
            Ok(outcome) => report.record(outcome),
            Err(e) => {
                let err = match e {
                    e @ Error::Download { .. } => e,
                    e => Error::Download {
                        name: artifact.name.clone(),
                        reason: e.to_string(),
                    },
                };
                log::warn!("{err}");
                report.failed.push(err);
            }
        }
    }

    log::info!(
        "Downloaded {}, skipped {}, failed {}",
        report.downloaded.len(),
        report.skipped.len(),
        report.failed.len()
    );
    report
}

pub async fn download_artifact(
    session: &Session,
    artifact: &ResultArtifact,
    output_dir: &Path,
    overwrite: bool,
) -> Result<ArtifactOutcome> {
    let dst = target_path(output_dir, &artifact.name)?;
    if !overwrite && fs::try_exists(&dst).await? {
        log::info!("{} already exists, skipping {}", dst.display(), artifact.name);
        return Ok(ArtifactOutcome::Skipped { path: dst });
    }

    // Make parent directories as necessary
    if let Some(parent_dir) = dst.parent() {
        fs::create_dir_all(parent_dir).await?;
    }

    // Pick up from a previous interrupted attempt if there is one, unless
    // the artifact is being fetched again from scratch
    let partial = partial_path(&dst);
    let mut byte_count = match fs::metadata(&partial).await {
        Ok(meta) if !overwrite => meta.len(),
        _ => 0,
    };

    let mut request = session.get_anon(&artifact.location);
    if byte_count > 0 {
        request = request.header(RANGE, format!("bytes={byte_count}-"));
    }
    let response = request.send().await?;

    let resume = match response.status() {
        StatusCode::PARTIAL_CONTENT if byte_count > 0 => {
            log::info!("Resuming {} from byte {byte_count}", artifact.name);
            true
        }
        status if status.is_success() => false,
        StatusCode::RANGE_NOT_SATISFIABLE if byte_count > 0 => {
            if remote_length(&response) == Some(byte_count) {
                // The previous attempt got every byte but stopped before the rename
                log::info!("{} was already fully downloaded", artifact.name);
                fs::rename(&partial, &dst).await?;
                return Ok(ArtifactOutcome::Downloaded {
                    path: dst,
                    bytes: byte_count,
                });
            }
            // Stale partial file, start over on the next attempt
            fs::remove_file(&partial).await?;
            return Err(Error::Download {
                name: artifact.name.clone(),
                reason: "partial file no longer matches the remote artifact".to_string(),
            });
        }
        status => {
            return Err(Error::Download {
                name: artifact.name.clone(),
                reason: format!("HTTP status {status}"),
            })
        }
    };
    if !resume {
        byte_count = 0;
    }

    log::info!("Downloading {} to {}", artifact.name, dst.display());
    let mut partial_file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(resume)
        .truncate(!resume)
        .open(&partial)
        .await?;

    let mut body = pin!(response.bytes_stream());
    while let Some(bytes) = body.try_next().await? {
        partial_file.write_all(&bytes).await?;
        byte_count += bytes.len() as u64;
    }
    partial_file.flush().await?;
    drop(partial_file);

    // Rename the file to remove .partial suffix
    fs::rename(&partial, &dst).await?;

    Ok(ArtifactOutcome::Downloaded {
        path: dst,
        bytes: byte_count,
    })
}

/// Total size from a `Content-Range: bytes */<len>` header.
fn remote_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit_once('/')?
        .1
        .trim()
        .parse()
        .ok()
}

/// Joins an artifact name onto the output directory, refusing names that
/// would land outside of it.
fn target_path(output_dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let is_safe = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !is_safe {
        return Err(Error::Download {
            name: name.to_string(),
            reason: "artifact name escapes the output directory".to_string(),
        });
    }
    Ok(output_dir.join(relative))
}

fn partial_path(dst: &Path) -> PathBuf {
    let mut partial = dst.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}
