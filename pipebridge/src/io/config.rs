//! Bridge configuration loaded from `pipebridge.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::route::DEFAULT_PLACEHOLDER;
use crate::io::launch::{DEFAULT_RELAY_BUFFER_BYTES, SpawnOptions};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "pipebridge.toml";

/// Bridge configuration (TOML).
///
/// Every field is optional; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Chunk size used when relaying bytes to and from children.
    pub relay_buffer_bytes: usize,

    /// How often a blocked wait re-checks for a pending kill, in milliseconds.
    pub exit_poll_interval_ms: u64,

    pub exec: ExecConfig,

    pub mux: MuxConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecConfig {
    /// Kill the child after this many seconds. `0` disables the timeout.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MuxConfig {
    /// Replaced by the channel id in the arguments of each spawned child.
    pub placeholder: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay_buffer_bytes: DEFAULT_RELAY_BUFFER_BYTES,
            exit_poll_interval_ms: 50,
            exec: ExecConfig::default(),
            mux: MuxConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.relay_buffer_bytes == 0 {
            return Err(anyhow!("relay_buffer_bytes must be > 0"));
        }
        if self.exit_poll_interval_ms == 0 {
            return Err(anyhow!("exit_poll_interval_ms must be > 0"));
        }
        if self.mux.placeholder.is_empty() {
            return Err(anyhow!("mux.placeholder must be non-empty"));
        }
        Ok(())
    }

    pub fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            relay_buffer_bytes: self.relay_buffer_bytes,
            exit_poll_interval: Duration::from_millis(self.exit_poll_interval_ms),
        }
    }

    /// Configured exec timeout, `None` when disabled.
    pub fn exec_timeout(&self) -> Option<Duration> {
        (self.exec.timeout_secs > 0).then(|| Duration::from_secs(self.exec.timeout_secs))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BridgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        let cfg = BridgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BridgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
