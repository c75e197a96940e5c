//! Atomic artifact installation and proxy reloading
//!
//! The artifact is written to a temporary file in the target's own
//! directory and renamed over the target in one filesystem operation, so a
//! concurrent reader (the proxy reloads asynchronously) can never observe a
//! partially written configuration. Only after the rename lands is the
//! reload hook invoked.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PublishError, ReloadError};

/// The external action that makes the proxy pick up a newly installed
/// configuration. Opaque to the pipeline beyond success or failure.
pub trait ReloadHook: Send + Sync {
    fn reload(&self) -> impl Future<Output = Result<(), ReloadError>> + Send;
}

/// Reload hook that runs an operator-supplied command line.
pub struct CommandReloadHook {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandReloadHook {
    /// Split a command line such as "systemctl reload haproxy.service" into
    /// a program and arguments.
    pub fn new(command_line: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut parts = shell_words::split(command_line)
            .map_err(|e| anyhow::anyhow!("Invalid reload command '{}': {}", command_line, e))?;
        if parts.is_empty() {
            anyhow::bail!("Reload command must not be empty");
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
            timeout,
        })
    }
}

impl ReloadHook for CommandReloadHook {
    async fn reload(&self) -> Result<(), ReloadError> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ReloadError::TimedOut {
            secs: self.timeout.as_secs(),
        })?
        .map_err(ReloadError::Spawn)?;

        if output.status.success() {
            info!(command = %self.program, "proxy reloaded");
            Ok(())
        } else {
            Err(ReloadError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Installs rendered artifacts at the target path and triggers the reload
/// hook.
pub struct Publisher<H> {
    output_path: PathBuf,
    hook: H,
}

impl<H: ReloadHook> Publisher<H> {
    pub fn new(output_path: impl Into<PathBuf>, hook: H) -> Self {
        Self {
            output_path: output_path.into(),
            hook,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Atomically install the artifact, then ask the proxy to reload.
    ///
    /// On [`PublishError::WriteFailed`] the previous configuration is still
    /// live and the hook has not run. On [`PublishError::ReloadFailed`] the
    /// new artifact is already installed; only the reload needs retrying.
    pub async fn publish(&self, artifact: &[u8]) -> Result<(), PublishError> {
        self.install(artifact).map_err(PublishError::WriteFailed)?;
        debug!(path = %self.output_path.display(), bytes = artifact.len(), "artifact installed");
        self.hook.reload().await.map_err(PublishError::ReloadFailed)
    }

    fn install(&self, artifact: &[u8]) -> std::io::Result<()> {
        // The temp file must live in the target's directory: rename is only
        // atomic within one filesystem.
        let dir = self
            .output_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(artifact)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.output_path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Scripted reload hook for tests: counts invocations, optionally fails.
#[cfg(test)]
pub struct MockReloadHook {
    pub calls: std::sync::atomic::AtomicUsize,
    pub fail: bool,
}

#[cfg(test)]
impl MockReloadHook {
    pub fn succeeding() -> Self {
        Self {
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl ReloadHook for &MockReloadHook {
    async fn reload(&self) -> Result<(), ReloadError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail {
            Err(ReloadError::Failed {
                status: 1,
                stderr: "mock reload failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}
