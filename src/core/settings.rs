use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub quota_per_credential: u32,
    pub window_secs: u64,
    pub cache_ttl_secs: u64,
    pub rescan_secs: u64,
    pub fallback_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quota_per_credential: 100,
            window_secs: 60,
            cache_ttl_secs: 60,
            rescan_secs: 30,
            fallback_interval_ms: 600,
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content).context("Failed to parse settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.quota_per_credential == 0 {
            anyhow::bail!("quota_per_credential must be greater than zero");
        }
        if self.window_secs == 0 {
            anyhow::bail!("window_secs must be greater than zero");
        }
        if self.fallback_interval_ms == 0 {
            anyhow::bail!("fallback_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_secs)
    }

    pub fn fallback_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.quota_per_credential, 100);
        assert_eq!(settings.window_secs, 60);
        assert_eq!(settings.cache_ttl_secs, 60);
        assert_eq!(settings.rescan_secs, 30);
        assert_eq!(settings.fallback_interval_ms, 600);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.quota_per_credential = 0;
        assert!(settings.validate().is_err());

        settings = Settings::default();
        settings.window_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            quota_per_credential = 50
            window_secs = 30
            cache_ttl_secs = 120
        "#;

        let settings = Settings::from_toml(toml).unwrap();
        assert_eq!(settings.quota_per_credential, 50);
        assert_eq!(settings.window(), Duration::from_secs(30));
        assert_eq!(settings.cache_ttl(), Duration::from_secs(120));
        // Unspecified fields keep their defaults
        assert_eq!(settings.rescan_secs, 30);
    }

    #[test]
    fn test_parse_toml_rejects_zero_quota() {
        assert!(Settings::from_toml("quota_per_credential = 0").is_err());
    }
}
