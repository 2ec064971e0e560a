//! Application server management - spawning and health checking the app under test

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};
use crate::session::millis;
use crate::wait::{Attempt, RetryPolicy};

/// Handle to a running application process
pub struct ServerHandle {
    child: Child,
    pub base_url: String,
    pub port: u16,
}

impl ServerHandle {
    /// Spawn the application and wait until its health endpoint answers
    pub async fn spawn(config: ServerConfig) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://127.0.0.1:{}", port);

        info!("Spawning {} on port {}", config.binary_path.display(), port);

        let mut cmd = Command::new(&config.binary_path);
        cmd.args(&config.args)
            .envs(&config.env)
            .env(&config.port_env, port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!(
                "Failed to spawn {}: {}",
                config.binary_path.display(),
                e
            ))
        })?;

        let handle = ServerHandle {
            child,
            base_url: base_url.clone(),
            port,
        };

        handle
            .wait_for_healthy(&config.health_path, config.startup_timeout)
            .await?;

        info!("Server is healthy at {}", base_url);
        Ok(handle)
    }

    /// Poll the health endpoint until it returns 2xx
    async fn wait_for_healthy(&self, path: &str, timeout: Duration) -> E2eResult<()> {
        let health_url = format!("{}{}", self.base_url, path);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let policy = RetryPolicy {
            timeout,
            interval: Duration::from_millis(100),
        };

        policy
            .poll(|attempt| {
                let request = client.get(&health_url).send();
                async move {
                    match request.await {
                        Ok(resp) if resp.status().is_success() => Ok(Attempt::Ready(())),
                        Ok(resp) => {
                            warn!("Health check returned {}", resp.status());
                            Ok(Attempt::Retry(E2eError::ServerHealthCheck(attempt + 1)))
                        }
                        Err(e) => {
                            if attempt == 0 {
                                info!("Waiting for server to start...");
                            }
                            // Connection refused is expected while the server boots
                            if !e.is_connect() {
                                warn!("Health check error: {}", e);
                            }
                            Ok(Attempt::Retry(E2eError::ServerHealthCheck(attempt + 1)))
                        }
                    }
                }
            })
            .await
    }

    /// Get the base URL for this server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the server: SIGTERM, a short grace period, then kill
    pub async fn shutdown(&mut self) -> E2eResult<()> {
        if self.has_exited()? {
            return Ok(());
        }
        info!("Stopping server (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                let mut grace = RetryPolicy {
                    timeout: Duration::from_millis(500),
                    interval: Duration::from_millis(20),
                }
                .start();
                while !self.has_exited()? && grace.wait().await {}
            }
        }

        self.stop()
    }

    /// Kill the server if it is still running. Safe to call repeatedly: a
    /// reaped process is never signalled again.
    pub fn stop(&mut self) -> E2eResult<()> {
        if self.has_exited()? {
            return Ok(());
        }
        info!("Killing server (pid: {})", self.child.id());
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }

    fn has_exited(&mut self) -> E2eResult<bool> {
        Ok(self.child.try_wait()?.is_some())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Configuration for spawning the application under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Path to the application binary
    pub binary_path: PathBuf,

    pub args: Vec<String>,

    /// Extra environment, e.g. the backend URL the app proxies to
    pub env: BTreeMap<String, String>,

    /// Port to listen on (None = find free port)
    pub port: Option<u16>,

    /// Environment variable the port is passed through
    pub port_env: String,

    pub health_path: String,

    #[serde(with = "millis")]
    pub startup_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("./opg-sirius-user-management"),
            args: Vec::new(),
            env: BTreeMap::new(),
            port: None,
            port_env: "PORT".to_string(),
            health_path: "/health-check".to_string(),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// Find a free port to use
fn find_free_port() -> E2eResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_free_port() {
        let port = find_free_port().unwrap();
        assert!(port > 1024);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let config = ServerConfig {
            binary_path: PathBuf::from("/nonexistent/app-under-test"),
            startup_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let err = ServerHandle::spawn(config).await.err().unwrap();
        assert!(matches!(err, E2eError::ServerStartup(_)));
    }

    fn sleeper() -> ServerHandle {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        ServerHandle {
            child,
            base_url: "http://127.0.0.1:0".to_string(),
            port: 0,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_terminates_and_is_idempotent() {
        let mut handle = sleeper();
        handle.shutdown().await.unwrap();
        assert!(handle.has_exited().unwrap());

        // Already reaped: neither call signals the old pid again
        handle.shutdown().await.unwrap();
        handle.stop().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_kills_without_grace_period() {
        let mut handle = sleeper();
        let start = std::time::Instant::now();
        handle.stop().unwrap();
        assert!(handle.has_exited().unwrap());
        assert!(start.elapsed() < Duration::from_millis(500));
        handle.stop().unwrap();
    }

    #[test]
    fn test_config_from_yaml() {
        let config: ServerConfig = serde_yaml::from_str(
            "binary_path: bin/app\nport: 9000\nstartup_timeout: 1500\nenv:\n  SIRIUS_URL: http://localhost:8080\n",
        )
        .unwrap();
        assert_eq!(config.port, Some(9000));
        assert_eq!(config.startup_timeout, Duration::from_millis(1500));
        assert_eq!(config.health_path, "/health-check");
        assert_eq!(config.env["SIRIUS_URL"], "http://localhost:8080");
    }
}
