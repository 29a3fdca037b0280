//! `ReleaseManager` backed by the helm v3 binary.
//!
//! Every call shells out to `helm ... --output json` and decodes stdout.
//! Values are streamed on stdin (`--values -`), so nothing is written to disk.

use super::manager::{
    InstallOptions, ReleaseError, ReleaseManager, RollbackOptions, UpgradeOptions,
};
use super::release::{Release, ReleaseStatus};
use crate::config::DeployerConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// Grace on top of helm's own `--timeout` before we give up on the process
const LOCAL_DEADLINE_GRACE: Duration = Duration::from_secs(30);

/// Deadline for calls that carry no helm timeout (status, history)
const QUERY_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct WireRelease {
    name: String,
    version: u32,
    #[serde(default)]
    manifest: String,
    info: WireInfo,
}

#[derive(Debug, Deserialize)]
struct WireInfo {
    #[serde(default)]
    last_deployed: Option<DateTime<Utc>>,
    #[serde(default)]
    status: ReleaseStatus,
}

#[derive(Debug, Deserialize)]
struct WireHistoryEntry {
    revision: u32,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    status: ReleaseStatus,
}

fn decode_release(stdout: &[u8]) -> Result<Release, ReleaseError> {
    let wire: WireRelease = serde_json::from_slice(stdout)?;
    Ok(Release {
        name: wire.name,
        revision: wire.version,
        status: wire.info.status,
        manifest: wire.manifest,
        last_deployed: wire.info.last_deployed.unwrap_or_default(),
    })
}

fn decode_history(release_name: &str, stdout: &[u8]) -> Result<Vec<Release>, ReleaseError> {
    let entries: Vec<WireHistoryEntry> = serde_json::from_slice(stdout)?;
    Ok(entries
        .into_iter()
        .map(|entry| Release {
            name: release_name.to_string(),
            revision: entry.revision,
            status: entry.status,
            manifest: String::new(),
            last_deployed: entry.updated.unwrap_or_default(),
        })
        .collect())
}

/// Map helm's stderr onto our error kinds
fn classify_failure(operation: &'static str, release_name: &str, stderr: &str) -> ReleaseError {
    let message = stderr.trim().trim_start_matches("Error: ").to_string();
    if message.contains("release: not found") {
        ReleaseError::NotFound {
            release: release_name.to_string(),
        }
    } else if message.contains("timed out") {
        ReleaseError::TimedOut {
            operation,
            release: release_name.to_string(),
            message,
        }
    } else {
        ReleaseError::Failed { operation, message }
    }
}

fn helm_timeout(timeout: Duration) -> String {
    format!("{}s", timeout.as_secs())
}

fn install_args(release_name: &str, chart: &Path, options: &InstallOptions) -> Vec<String> {
    let mut args = vec![
        "install".to_string(),
        release_name.to_string(),
        chart.display().to_string(),
        "--values".to_string(),
        "-".to_string(),
        "--output".to_string(),
        "json".to_string(),
        "--timeout".to_string(),
        helm_timeout(options.timeout),
        "--description".to_string(),
        options.description.clone(),
    ];
    if options.wait {
        args.push("--wait".to_string());
    }
    if options.wait_for_jobs {
        args.push("--wait-for-jobs".to_string());
    }
    args
}

fn upgrade_args(release_name: &str, chart: &Path, options: &UpgradeOptions) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        release_name.to_string(),
        chart.display().to_string(),
        "--values".to_string(),
        "-".to_string(),
        "--output".to_string(),
        "json".to_string(),
        "--timeout".to_string(),
        helm_timeout(options.timeout),
    ];
    if options.dry_run {
        args.push("--dry-run".to_string());
    }
    if options.force {
        args.push("--force".to_string());
    }
    if options.wait {
        args.push("--wait".to_string());
    }
    // helm 3 upgrade has no --recreate-pods; --force already replaces resources
    args
}

fn rollback_args(release_name: &str, revision: u32, options: &RollbackOptions) -> Vec<String> {
    let mut args = vec![
        "rollback".to_string(),
        release_name.to_string(),
        revision.to_string(),
        "--timeout".to_string(),
        helm_timeout(options.timeout),
    ];
    if options.force {
        args.push("--force".to_string());
    }
    if options.recreate_pods {
        args.push("--recreate-pods".to_string());
    }
    if options.wait {
        args.push("--wait".to_string());
    }
    args
}

/// Write `input` to a child's stdin
///
/// A child that exits without reading (bad chart path, unknown flag) closes
/// the pipe early; its exit status and stderr explain why, so a broken pipe
/// is not an error here.
async fn feed_stdin<W>(pipe: &mut W, input: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match pipe.write_all(input).await {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            debug!("helm exited before reading its values");
            Ok(())
        }
        other => other,
    }
}

pub struct HelmCli {
    binary: String,
    namespace: String,
    kube_context: Option<String>,
}

impl HelmCli {
    pub fn new(config: &DeployerConfig) -> Self {
        HelmCli {
            binary: config.helm_bin.clone(),
            namespace: config.namespace.clone(),
            kube_context: config.kube_context.clone(),
        }
    }

    /// Run helm with `args`, feeding `stdin` if given
    ///
    /// # Returns
    /// stdout of a successful run
    async fn run(
        &self,
        operation: &'static str,
        release_name: &str,
        args: Vec<String>,
        stdin: Option<Vec<u8>>,
        deadline: Duration,
    ) -> Result<Vec<u8>, ReleaseError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .arg("--namespace")
            .arg(&self.namespace)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(context) = &self.kube_context {
            cmd.arg("--kube-context").arg(context);
        }

        debug!(release = %release_name, operation = operation, args = ?args, "Running helm");
        let mut child = cmd.spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            feed_stdin(&mut pipe, &input).await?;
            // Closing stdin lets helm start reading the values
            drop(pipe);
        }

        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(ReleaseError::TimedOut {
                    operation,
                    release: release_name.to_string(),
                    message: format!("helm did not finish within {:?}", deadline),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(operation, release_name, &stderr));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ReleaseManager for HelmCli {
    async fn install(
        &self,
        chart: &Path,
        release_name: &str,
        values: &Value,
        options: &InstallOptions,
    ) -> Result<Release, ReleaseError> {
        let stdout = self
            .run(
                "install",
                release_name,
                install_args(release_name, chart, options),
                Some(serde_json::to_vec(values)?),
                options.timeout + LOCAL_DEADLINE_GRACE,
            )
            .await?;
        decode_release(&stdout)
    }

    async fn upgrade(
        &self,
        release_name: &str,
        chart: &Path,
        values: &Value,
        options: &UpgradeOptions,
    ) -> Result<Release, ReleaseError> {
        let operation = if options.dry_run {
            "upgrade --dry-run"
        } else {
            "upgrade"
        };
        let stdout = self
            .run(
                operation,
                release_name,
                upgrade_args(release_name, chart, options),
                Some(serde_json::to_vec(values)?),
                options.timeout + LOCAL_DEADLINE_GRACE,
            )
            .await?;
        decode_release(&stdout)
    }

    async fn status(&self, release_name: &str) -> Result<Release, ReleaseError> {
        let stdout = self
            .run(
                "status",
                release_name,
                vec![
                    "status".to_string(),
                    release_name.to_string(),
                    "--output".to_string(),
                    "json".to_string(),
                ],
                None,
                QUERY_DEADLINE,
            )
            .await?;
        let mut release = decode_release(&stdout)?;

        // Older helm releases omit the manifest from status output
        if release.manifest.is_empty() {
            let manifest = self
                .run(
                    "get manifest",
                    release_name,
                    vec![
                        "get".to_string(),
                        "manifest".to_string(),
                        release_name.to_string(),
                    ],
                    None,
                    QUERY_DEADLINE,
                )
                .await?;
            release.manifest = String::from_utf8_lossy(&manifest).into_owned();
        }
        Ok(release)
    }

    async fn history(&self, release_name: &str, max: usize) -> Result<Vec<Release>, ReleaseError> {
        let stdout = self
            .run(
                "history",
                release_name,
                vec![
                    "history".to_string(),
                    release_name.to_string(),
                    "--max".to_string(),
                    max.to_string(),
                    "--output".to_string(),
                    "json".to_string(),
                ],
                None,
                QUERY_DEADLINE,
            )
            .await?;
        decode_history(release_name, &stdout)
    }

    async fn rollback(
        &self,
        release_name: &str,
        revision: u32,
        options: &RollbackOptions,
    ) -> Result<Release, ReleaseError> {
        self.run(
            "rollback",
            release_name,
            rollback_args(release_name, revision, options),
            None,
            options.timeout + LOCAL_DEADLINE_GRACE,
        )
        .await?;
        // helm rollback prints no JSON; read back the new revision
        self.status(release_name).await
    }
}
