//! Error taxonomy for the synchronization pipeline
//!
//! Each pipeline stage has its own error domain so the synchronizer can log
//! which stage failed and callers can pick the right recovery action: a
//! failed reload wants the reload retried, a failed write wants a whole new
//! collect-render-publish cycle.

use thiserror::Error;

/// Errors raised while collecting the container inventory.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// The container runtime could not be queried at all. Fatal to the
    /// current cycle, not to the process.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// A single listing entry could not be parsed. Absorbed per entry: the
    /// entry is skipped with a warning and collection continues.
    #[error("malformed container listing entry: {0}")]
    MalformedEntry(String),
}

/// Errors raised while rendering the configuration artifact.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template file could not be read or parsed.
    #[error("failed to load template {}: {reason}", path.display())]
    TemplateLoad {
        path: std::path::PathBuf,
        reason: String,
    },

    /// The template references something outside the data contract, or
    /// otherwise failed during execution.
    #[error("template execution failed: {0}")]
    TemplateExec(String),
}

/// Errors raised by the reload hook itself.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The reload command could not be spawned.
    #[error("failed to spawn reload command: {0}")]
    Spawn(#[source] std::io::Error),

    /// The reload command ran but exited non-zero.
    #[error("reload command exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    /// The reload command did not complete within the configured bound.
    #[error("reload command timed out after {secs}s")]
    TimedOut { secs: u64 },
}

/// Errors raised while publishing the artifact.
///
/// The two variants demand different recovery: after `WriteFailed` the
/// previous configuration is still live and the whole cycle must be retried;
/// after `ReloadFailed` the new artifact is already installed and only the
/// reload needs to happen again.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Writing or atomically installing the artifact failed. The previous
    /// configuration on disk is untouched.
    #[error("failed to install configuration artifact: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// The artifact is installed but the proxy was not told to pick it up.
    #[error("configuration installed but reload failed: {0}")]
    ReloadFailed(#[source] ReloadError),
}

/// Errors raised by the event watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// The lifecycle subscription ended, either because the stream closed or
    /// a read failed. The daemon has lost its only signal source and cannot
    /// usefully continue; there is no in-process reconnect. An external
    /// supervisor restarting the process re-runs the unconditional startup
    /// cycle, which brings the configuration back in line with reality.
    #[error("container lifecycle event stream terminated")]
    StreamTerminated,
}

/// A single synchronization cycle's failure, tagged by stage.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Collect(#[from] CollectionError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl CycleError {
    /// Short stage label for log records.
    pub fn stage(&self) -> &'static str {
        match self {
            CycleError::Collect(_) => "collect",
            CycleError::Render(_) => "render",
            CycleError::Publish(_) => "publish",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_stage_labels() {
        let collect: CycleError = CollectionError::RuntimeUnavailable("gone".to_string()).into();
        assert_eq!(collect.stage(), "collect");

        let render: CycleError = RenderError::TemplateExec("boom".to_string()).into();
        assert_eq!(render.stage(), "render");

        let publish: CycleError = PublishError::WriteFailed(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ))
        .into();
        assert_eq!(publish.stage(), "publish");
    }

    #[test]
    fn test_publish_error_variants_are_distinct() {
        let write = PublishError::WriteFailed(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        ));
        let reload = PublishError::ReloadFailed(ReloadError::Failed {
            status: 1,
            stderr: "haproxy: bad config".to_string(),
        });

        assert!(matches!(write, PublishError::WriteFailed(_)));
        assert!(matches!(reload, PublishError::ReloadFailed(_)));
        assert!(reload.to_string().contains("reload failed"));
    }

    #[test]
    fn test_render_error_display_includes_path() {
        let err = RenderError::TemplateLoad {
            path: std::path::PathBuf::from("/etc/gatesync/haproxy.tmpl"),
            reason: "no such file".to_string(),
        };
        assert!(err.to_string().contains("/etc/gatesync/haproxy.tmpl"));
    }
}
