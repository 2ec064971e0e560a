//! Runner configuration, loadable from YAML and overridden from the command line

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::server::ServerConfig;
use crate::session::{millis, SessionConfig};

/// Configuration for the scenario runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub session: SessionConfig,

    /// Application to spawn before running; `None` targets `session.base_url` as is
    pub server: Option<ServerConfig>,

    /// Scenario files or directories
    pub specs: Vec<PathBuf>,

    /// Scenarios run concurrently, each in its own session
    pub jobs: usize,

    /// Wall-clock budget per scenario
    #[serde(with = "millis")]
    pub scenario_timeout: Duration,

    /// Output directory for results
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            server: None,
            specs: vec![PathBuf::from("specs")],
            jobs: 1,
            scenario_timeout: Duration::from_secs(60),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

impl RunnerConfig {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let config: RunnerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.jobs == 0 {
            return Err(E2eError::Config("jobs must be at least 1".to_string()));
        }
        if self.scenario_timeout.is_zero() {
            return Err(E2eError::Config("scenario_timeout must be positive".to_string()));
        }
        if self.session.retry_interval.is_zero() {
            return Err(E2eError::Config("retry_interval must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.jobs, 1);
        assert!(config.server.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = RunnerConfig::from_yaml(
            r#"
jobs: 4
scenario_timeout: 5000
session:
  base_url: http://localhost:8888
  lookup_timeout: 250
server:
  binary_path: ./bin/user-management
"#,
        )
        .unwrap();
        assert_eq!(config.jobs, 4);
        assert_eq!(config.scenario_timeout, Duration::from_secs(5));
        assert_eq!(config.session.lookup_timeout, Duration::from_millis(250));
        assert_eq!(config.session.retry_interval, Duration::from_millis(100));
        assert_eq!(config.server.unwrap().port_env, "PORT");
        assert_eq!(config.output_dir, PathBuf::from("test-results"));
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let err = RunnerConfig::from_yaml("jobs: 0\n").unwrap_err();
        assert!(matches!(err, E2eError::Config(_)));
    }
}
