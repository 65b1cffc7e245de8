// Configuration loaded once at startup from `upload.env` and the process
// environment. Values are immutable for the rest of the run.

use crate::error::UploadError;
use crate::size::parse_size;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_ENV_FILE: &str = "upload.env";
pub const DEFAULT_PART_SIZE: &str = "1GB";
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_url: String,
    pub session_token: String,
    pub part_size: u64,
    pub workers: usize,
    pub channel_id: Option<i64>,
}

impl Config {
    /// Load `env_file` (or the default locations) into the environment
    /// without overriding variables that are already set, then read the
    /// configuration from the environment.
    pub fn load(env_file: Option<&Path>) -> Result<Self, UploadError> {
        let located = locate_env_file(env_file, Path::new("."), dirs::config_dir());
        load_env_file(located.as_deref())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from a key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, UploadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = get("API_URL")
            .ok_or_else(|| UploadError::Config("API_URL is not set".into()))?
            .trim()
            .trim_end_matches('/')
            .to_string();
        let session_token = get("SESSION_TOKEN")
            .ok_or_else(|| UploadError::Config("SESSION_TOKEN is not set".into()))?;

        let part_size = parse_size(&get("PART_SIZE").unwrap_or_else(|| DEFAULT_PART_SIZE.into()))?;

        let workers = match get("WORKERS") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                UploadError::Config(format!("WORKERS must be a positive integer, got '{}'", raw))
            })?,
            None => DEFAULT_WORKERS,
        };

        let channel_id = get("CHANNEL_ID")
            .map(|raw| {
                raw.trim().parse::<i64>().map_err(|_| {
                    UploadError::Config(format!("CHANNEL_ID must be an integer, got '{}'", raw))
                })
            })
            .transpose()?;

        let config = Config {
            api_url,
            session_token,
            part_size,
            workers,
            channel_id,
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded values.
    pub fn with_overrides(
        mut self,
        part_size: Option<u64>,
        workers: Option<usize>,
    ) -> Result<Self, UploadError> {
        if let Some(part_size) = part_size {
            self.part_size = part_size;
        }
        if let Some(workers) = workers {
            self.workers = workers;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), UploadError> {
        if self.part_size == 0 {
            return Err(UploadError::Config("part size must be greater than zero".into()));
        }
        if self.workers == 0 {
            return Err(UploadError::Config("WORKERS must be at least 1".into()));
        }
        Ok(())
    }
}

/// Pick the env file: an explicit path always wins, then `upload.env` in
/// `local_dir`, then `<config_dir>/uploader/upload.env`.
fn locate_env_file(explicit: Option<&Path>, local_dir: &Path, config_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = local_dir.join(DEFAULT_ENV_FILE);
    if local.is_file() {
        return Some(local);
    }
    config_dir
        .map(|dir| dir.join("uploader").join(DEFAULT_ENV_FILE))
        .filter(|path| path.is_file())
}

// Variables already present in the process environment are left alone.
fn load_env_file(path: Option<&Path>) -> Result<(), UploadError> {
    match path {
        Some(path) => {
            dotenv::from_path(path)
                .map_err(|e| UploadError::Config(format!("failed to read {}: {}", path.display(), e)))?;
            debug!(path = %path.display(), "loaded env file");
        }
        None => debug!("no env file found, using process environment"),
    }
    Ok(())
}
