//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Isolated socket paths
//! - A temporary flat data directory for startup loading
//!
//! # Usage
//!
//! ```ignore
//! use cbfs_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     // env.socket_path and env.data_dir are isolated
//!     // The server is NOT auto-started - tests control lifecycle
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Unique socket path for this test
    pub socket_path: PathBuf,
    /// Flat directory of initial server files
    pub data_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let data_dir = root.join("filesystem");
        std::fs::create_dir_all(&data_dir)?;

        let socket_path = root.join(format!("cbfs-test-{}.sock", test_id));

        Ok(Self {
            _temp_dir: temp_dir,
            socket_path,
            data_dir,
            test_id,
        })
    }

    /// Seed a file into the data directory
    pub fn create_file(&self, name: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.data_dir.join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Check if socket exists (server may be running)
    pub fn is_socket_present(&self) -> bool {
        self.socket_path.exists()
    }

    /// Config pointing server and client at this environment.
    /// Uses small worker/queue sizes so tests exercise the limits.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.server.socket = self.socket_path.clone();
        cfg.server.data_dir = Some(self.data_dir.clone());
        cfg.server.notify_workers = 2;
        cfg.server.notify_queue = 64;
        cfg.client.socket = self.socket_path.clone();
        cfg
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.data_dir.exists());
        assert!(!env.is_socket_present());
    }

    #[test]
    fn test_environment_has_unique_socket() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.socket_path, env2.socket_path);
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("hello.txt", b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_config_points_at_environment() {
        let env = TestEnvironment::new().unwrap();
        let cfg = env.config();
        assert_eq!(cfg.server.socket, env.socket_path);
        assert_eq!(cfg.client.socket, env.socket_path);
        assert_eq!(cfg.server.data_dir.as_deref(), Some(env.data_dir.as_path()));
    }
}
