//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};

/// Top-level configuration for a workflow test run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct E2eConfig {
    /// API under test
    pub api: ApiConfig,

    /// Login used by the authenticate step
    pub credentials: Credentials,

    /// Settle interval before identifier listing queries
    pub settle_ms: u64,

    /// Listing page size for identifier recovery
    pub page_size: u32,

    /// Directory containing workflow plan YAML files
    pub plans_dir: PathBuf,

    /// Output directory for results
    pub output_dir: PathBuf,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            credentials: Credentials::default(),
            settle_ms: LOCAL_SETTLE_MS,
            page_size: ecare_common::DEFAULT_PAGE_SIZE,
            plans_dir: PathBuf::from("tests/plans"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Settle interval outside CI
pub const LOCAL_SETTLE_MS: u64 = 1000;

/// Settle interval on CI, where indexing lag is longer
pub const CI_SETTLE_MS: u64 = 3000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,

    /// Sent as `X-TENANT-ID` and as `xTENANTID` in payloads
    pub tenant_id: String,

    /// Sent as `Origin` and `Referer`
    pub origin: String,

    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stage-api.ecarehealth.com".to_string(),
            tenant_id: "stage_aithinkitive".to_string(),
            origin: "https://stage_aithinkitive.uat.provider.ecarehealth.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "rose.gomez@jourrapide.com".to_string(),
            password: String::new(),
        }
    }
}

impl E2eConfig {
    /// Load configuration from a YAML file, falling back to defaults when
    /// the file does not exist, then apply environment overrides.
    pub fn load(path: &Path) -> E2eResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply overrides looked up by `lookup` (the process environment in
    /// `load`).
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ECARE_BASE_URL") {
            self.api.base_url = url;
        }
        if let Some(tenant) = lookup("ECARE_TENANT_ID") {
            self.api.tenant_id = tenant;
        }
        if let Some(origin) = lookup("ECARE_ORIGIN") {
            self.api.origin = origin;
        }
        if let Some(username) = lookup("TEST_USERNAME") {
            self.credentials.username = username;
        }
        if let Some(password) = lookup("TEST_PASSWORD") {
            self.credentials.password = password;
        }
        if let Some(settle) = lookup("ECARE_SETTLE_MS").and_then(|v| v.parse().ok()) {
            self.settle_ms = settle;
        } else if lookup("CI").is_some() && self.settle_ms == LOCAL_SETTLE_MS {
            self.settle_ms = CI_SETTLE_MS;
        }
        self
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.api.base_url.is_empty() {
            return Err(E2eError::Config("api.base_url is empty".to_string()));
        }
        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            return Err(E2eError::Config(
                "credentials missing; set TEST_USERNAME and TEST_PASSWORD".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(E2eError::Config("page_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_ci_lengthens_settle() {
        let config = E2eConfig::default().with_env_overrides(env(&[("CI", "true")]));
        assert_eq!(config.settle_ms, CI_SETTLE_MS);

        let local = E2eConfig::default().with_env_overrides(env(&[]));
        assert_eq!(local.settle_ms, LOCAL_SETTLE_MS);
    }

    #[test]
    fn test_explicit_settle_wins_over_ci() {
        let config = E2eConfig::default()
            .with_env_overrides(env(&[("CI", "1"), ("ECARE_SETTLE_MS", "250")]));
        assert_eq!(config.settle(), Duration::from_millis(250));
    }

    #[test]
    fn test_env_overrides_api_and_credentials() {
        let config = E2eConfig::default().with_env_overrides(env(&[
            ("ECARE_BASE_URL", "http://127.0.0.1:8080"),
            ("ECARE_TENANT_ID", "qa_tenant"),
            ("TEST_USERNAME", "qa@test.com"),
            ("TEST_PASSWORD", "hunter2"),
        ]));
        assert_eq!(config.api.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.api.tenant_id, "qa_tenant");
        assert_eq!(config.credentials.username, "qa@test.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_password_rejected() {
        let config = E2eConfig::default();
        assert!(matches!(config.validate(), Err(E2eError::Config(_))));
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
api:
  base_url: http://localhost:9000
settle_ms: 50
"#;
        let config: E2eConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:9000");
        assert_eq!(config.api.tenant_id, "stage_aithinkitive");
        assert_eq!(config.settle_ms, 50);
        assert_eq!(config.page_size, 100);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = E2eConfig::load(Path::new("/nonexistent/ecare.yaml")).unwrap();
        assert_eq!(config.plans_dir, PathBuf::from("tests/plans"));
    }
}
