use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Runtime settings, read once from the environment at startup. `DB_URL` is
/// the only required variable; everything else has a default.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub upload_root: PathBuf,
    /// Idle window after which a `user`-role session is dropped.
    pub user_idle_secs: i64,
    pub max_upload_bytes: usize,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: String::new(),
            upload_root: PathBuf::from("uploads"),
            user_idle_secs: 15 * 60,
            max_upload_bytes: 8 * 1024 * 1024,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let mut cfg = AppConfig::default();
        cfg.database_url = env::var("DB_URL")
            .map_err(|_| AppError::Internal("DB_URL environment variable is not set".to_string()))?;
        if let Ok(addr) = env::var("BIND_ADDR") {
            cfg.bind_addr = addr;
        }
        if let Ok(root) = env::var("UPLOAD_ROOT") {
            cfg.upload_root = PathBuf::from(root);
        }
        if let Ok(secs) = env::var("USER_IDLE_SECS") {
            cfg.user_idle_secs = secs
                .parse()
                .map_err(|_| AppError::Internal("USER_IDLE_SECS must be an integer".to_string()))?;
        }
        if let Ok(bytes) = env::var("MAX_UPLOAD_BYTES") {
            cfg.max_upload_bytes = bytes.parse().map_err(|_| {
                AppError::Internal("MAX_UPLOAD_BYTES must be an integer".to_string())
            })?;
        }
        Ok(cfg)
    }

    /// Caps a client-supplied page size to the configured maximum.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        match requested {
            Some(n) if n >= 1 => n.min(self.max_page_size),
            _ => self.default_page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_caps_and_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.page_size(None), 20);
        assert_eq!(cfg.page_size(Some(0)), 20);
        assert_eq!(cfg.page_size(Some(50)), 50);
        assert_eq!(cfg.page_size(Some(1000)), 100);
    }
}
