use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::FailurePolicy;
use crate::error::GraderError;
use crate::reconcile::MatchPolicy;

pub const CONFIG_FILE_NAME: &str = "cheesegrader.json";
pub const DEFAULT_BASE_URL: &str = "https://q.utoronto.ca/api/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 10;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub download_workers: Option<usize>,
    #[serde(default)]
    pub upload_failure_policy: Option<FailurePolicy>,
    #[serde(default)]
    pub download_failure_policy: Option<FailurePolicy>,
    #[serde(default)]
    pub match_policy: Option<MatchPolicy>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub download_workers: usize,
    pub upload_failure_policy: FailurePolicy,
    pub download_failure_policy: FailurePolicy,
    pub match_policy: MatchPolicy,
    pub token_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            upload_failure_policy: FailurePolicy::Continue,
            download_failure_policy: FailurePolicy::FailFast,
            match_policy: MatchPolicy::Substring,
            token_file: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GraderError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE_NAME),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(ResolvedConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GraderError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GraderError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GraderError> {
        let defaults = ResolvedConfig::default();

        let base_url = config
            .base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(GraderError::ConfigParse(format!(
                "base_url must be an http(s) URL: {base_url}"
            )));
        }

        let download_workers = config
            .download_workers
            .unwrap_or(defaults.download_workers);
        if download_workers == 0 {
            return Err(GraderError::ConfigParse(
                "download_workers must be at least 1".to_string(),
            ));
        }

        let timeout = config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        Ok(ResolvedConfig {
            base_url,
            timeout,
            download_workers,
            upload_failure_policy: config
                .upload_failure_policy
                .unwrap_or(defaults.upload_failure_policy),
            download_failure_policy: config
                .download_failure_policy
                .unwrap_or(defaults.download_failure_policy),
            match_policy: config.match_policy.unwrap_or(defaults.match_policy),
            token_file: config.token_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.base_url, DEFAULT_BASE_URL);
        assert_eq!(resolved.download_workers, 10);
        assert_eq!(resolved.timeout, Duration::from_secs(10));
        assert_eq!(resolved.upload_failure_policy, FailurePolicy::Continue);
        assert_eq!(resolved.download_failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let config = Config {
            base_url: Some("https://canvas.example.edu/api/v1/".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.base_url, "https://canvas.example.edu/api/v1");
    }
}
