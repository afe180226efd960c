//! Platform-aware data storage directory management.

use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::config::EngineConfig;
use super::constants::{APP_NAME, ENV_DATA_DIR};

/// Data subdirectories under the engine's data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSubdir {
    Duckdb,
}

impl DataSubdir {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataSubdir::Duckdb => "duckdb",
        }
    }
}

/// Resolves and owns the engine's on-disk data directory.
#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
}

impl AppStorage {
    pub async fn init(config: &EngineConfig) -> Result<Self> {
        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(Self::resolve_default_data_dir);

        tokio::fs::create_dir_all(data_dir.join(DataSubdir::Duckdb.as_str()))
            .await
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);
        tracing::debug!(data_dir = %data_dir.display(), "storage initialized");

        Ok(Self { data_dir })
    }

    fn resolve_default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            return PathBuf::from(dir);
        }
        ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".").join(APP_NAME.to_lowercase()))
    }

    pub fn subdir(&self, subdir: DataSubdir) -> PathBuf {
        let path = self.data_dir.join(subdir.as_str());
        path.canonicalize().unwrap_or(path)
    }

    #[cfg(test)]
    pub fn init_for_test(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}
