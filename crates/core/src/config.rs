use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tuning knobs for the recovery engine.
///
/// The defaults are empirically tuned values; every one of them can be
/// overridden from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Escalation steps allowed before a resource is exhausted
    pub max_retries: u32,

    /// Protocol-error delay: base + step * (n - 1), capped
    pub protocol_base_delay_ms: u64,
    pub protocol_delay_step_ms: u64,
    pub protocol_max_delay_ms: u64,

    /// Exponential backoff for every other category
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Jitter factor to add randomness (0.0 to 1.0)
    pub jitter_factor: f64,

    /// Per-step timeouts
    pub protocol_step_timeout_ms: u64,
    pub step_timeout_ms: u64,

    /// Consecutive-error thresholds gating notifications
    pub protocol_notice_at: u32,
    pub protocol_warning_at: u32,
    pub server_error_notify_at: u32,

    /// Resources above this many consecutive errors count as problematic
    pub problematic_threshold: u32,

    pub notice_duration_ms: u64,
    pub warning_duration_ms: u64,
    pub error_duration_ms: u64,
    pub success_duration_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 6,
            protocol_base_delay_ms: 500,
            protocol_delay_step_ms: 200,
            protocol_max_delay_ms: 1500,
            base_delay_ms: 1000,
            backoff_multiplier: 1.5,
            max_delay_ms: 8000,
            jitter_factor: 0.3,
            protocol_step_timeout_ms: 8000,
            step_timeout_ms: 12000,
            protocol_notice_at: 2,
            protocol_warning_at: 4,
            server_error_notify_at: 5,
            problematic_threshold: 3,
            notice_duration_ms: 4000,
            warning_duration_ms: 6000,
            error_duration_ms: 10000,
            success_duration_ms: 3000,
        }
    }
}

impl RecoveryConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("Configuration file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = ?path, "Loaded recovery configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: RecoveryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine misbehave
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }
        if self.backoff_multiplier < 1.0 {
            anyhow::bail!("backoff_multiplier must be at least 1.0");
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            anyhow::bail!("jitter_factor must be between 0.0 and 1.0");
        }
        if self.base_delay_ms > self.max_delay_ms {
            anyhow::bail!("base_delay_ms cannot exceed max_delay_ms");
        }
        if self.protocol_base_delay_ms > self.protocol_max_delay_ms {
            anyhow::bail!("protocol_base_delay_ms cannot exceed protocol_max_delay_ms");
        }
        if self.protocol_step_timeout_ms == 0 || self.step_timeout_ms == 0 {
            anyhow::bail!("step timeouts must be greater than 0");
        }
        if self.protocol_notice_at > self.protocol_warning_at {
            anyhow::bail!("protocol_notice_at cannot exceed protocol_warning_at");
        }
        Ok(())
    }

    pub fn step_timeout(&self, protocol_error: bool) -> Duration {
        if protocol_error {
            Duration::from_millis(self.protocol_step_timeout_ms)
        } else {
            Duration::from_millis(self.step_timeout_ms)
        }
    }
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("TILE_RECOVERY_CONFIG_DIR") {
        PathBuf::from(config_dir).join("recovery.toml")
    } else {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tile-recovery")
            .join("recovery.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("recovery.toml");

        let config_content = r#"
max_retries = 4
base_delay_ms = 250
jitter_factor = 0.0
protocol_notice_at = 1
"#;
        std::fs::write(&config_path, config_content).unwrap();

        let config = RecoveryConfig::load(&config_path).unwrap();
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.base_delay_ms, 250);
        assert_eq!(config.jitter_factor, 0.0);
        assert_eq!(config.protocol_notice_at, 1);
        // untouched keys keep their defaults
        assert_eq!(config.max_delay_ms, 8000);
        assert_eq!(config.server_error_notify_at, 5);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = RecoveryConfig::load(Path::new("/non/existent/recovery.toml")).unwrap();
        assert_eq!(config, RecoveryConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(RecoveryConfig::from_toml("max_retries = 0").is_err());
        assert!(RecoveryConfig::from_toml("jitter_factor = 1.5").is_err());
        assert!(RecoveryConfig::from_toml("backoff_multiplier = 0.5").is_err());
        assert!(RecoveryConfig::from_toml("base_delay_ms = 9000").is_err());
        assert!(RecoveryConfig::from_toml("max_retries = \"six\"").is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(RecoveryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_step_timeouts() {
        let config = RecoveryConfig::default();
        assert_eq!(config.step_timeout(true), Duration::from_secs(8));
        assert_eq!(config.step_timeout(false), Duration::from_secs(12));
    }
}
