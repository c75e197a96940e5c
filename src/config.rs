use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the synchronizer daemon
///
/// # Security Warning
///
/// The `reload_command` is executed directly with the permissions of this
/// process. Configuration files must be protected with appropriate file
/// permissions (e.g., readable and writable only by the service user).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Path to the proxy configuration template
    #[serde(default = "default_template_file")]
    pub template_file: String,

    /// Path the rendered proxy configuration is installed at
    #[serde(default = "default_output_file")]
    pub output_file: String,

    /// Command executed to make the proxy pick up a newly installed
    /// configuration
    #[serde(default = "default_reload_command")]
    pub reload_command: String,

    /// Docker host URL, e.g. "unix:///var/run/docker.sock" or
    /// "tcp://127.0.0.1:2375" (default: DOCKER_HOST, then platform socket)
    pub docker_host: Option<String>,

    /// Bounds for external invocations
    #[serde(default)]
    pub timeouts: Timeouts,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Timeout in seconds for container runtime queries (list/inspect)
    #[serde(default = "default_runtime_timeout")]
    pub runtime_secs: u64,

    /// Timeout in seconds for the reload command
    #[serde(default = "default_reload_timeout")]
    pub reload_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            runtime_secs: default_runtime_timeout(),
            reload_secs: default_reload_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template_file: default_template_file(),
            output_file: default_output_file(),
            reload_command: default_reload_command(),
            docker_host: None,
            timeouts: Timeouts::default(),
        }
    }
}

// Default value functions
fn default_template_file() -> String {
    "haproxy.tmpl".to_string()
}

fn default_output_file() -> String {
    "/etc/haproxy/haproxy.cfg".to_string()
}

fn default_reload_command() -> String {
    "systemctl reload haproxy.service".to_string()
}

fn default_runtime_timeout() -> u64 {
    30 // 30 seconds for a docker list/inspect round trip
}

fn default_reload_timeout() -> u64 {
    30 // 30 seconds for the proxy to acknowledge a reload
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.template_file.trim().is_empty() {
            anyhow::bail!("'template_file' must not be empty");
        }
        if self.output_file.trim().is_empty() {
            anyhow::bail!("'output_file' must not be empty");
        }
        if self.reload_command.trim().is_empty() {
            anyhow::bail!("'reload_command' must not be empty");
        }
        if self.timeouts.runtime_secs == 0 {
            anyhow::bail!("'timeouts.runtime_secs' must be greater than 0");
        }
        if self.timeouts.reload_secs == 0 {
            anyhow::bail!("'timeouts.reload_secs' must be greater than 0");
        }
        Ok(())
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.runtime_secs)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.reload_secs)
    }
}
