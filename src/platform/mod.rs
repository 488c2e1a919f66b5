// Platform capabilities: device secret, HMAC and the SQL driver.
// One provider per target, chosen at runtime from configuration.

pub mod crypto;

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::config::Config;
use crate::storage::{Storage, StorageResult};

const DEVICE_SECRET_FILE: &str = "device_secret";

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("secret store error: {0}")]
    SecretStore(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(String),
}

pub trait PlatformProvider: Send + Sync {
    /// Stable per-installation secret, created on first use.
    fn device_secret(&self) -> Result<String, PlatformError>;

    /// Base64 HMAC-SHA256 of `data` keyed by `secret`.
    fn hmac(&self, data: &str, secret: &str) -> Result<String, PlatformError> {
        crypto::hmac_sha256_base64(data, secret)
    }

    fn open_storage(&self) -> StorageResult<Storage>;
}

/// File-backed provider for desktop and mobile installs.
pub struct NativePlatform {
    data_dir: PathBuf,
    db_path: PathBuf,
    secret: OnceLock<String>,
}

impl NativePlatform {
    pub fn new(data_dir: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            db_path: db_path.into(),
            secret: OnceLock::new(),
        }
    }

    pub fn secret_path(&self) -> PathBuf {
        self.data_dir.join(DEVICE_SECRET_FILE)
    }

    fn load_or_create_secret(&self) -> Result<String, PlatformError> {
        let path = self.secret_path();
        if let Ok(existing) = std::fs::read_to_string(&path) {
            let existing = existing.trim();
            if !existing.is_empty() {
                return Ok(existing.to_string());
            }
        }

        std::fs::create_dir_all(&self.data_dir)?;
        let secret = crypto::generate_device_secret();
        std::fs::write(&path, &secret)?;
        restrict_permissions(&path)?;
        tracing::info!(path = %path.display(), "created device secret");
        Ok(secret)
    }
}

impl PlatformProvider for NativePlatform {
    fn device_secret(&self) -> Result<String, PlatformError> {
        if let Some(secret) = self.secret.get() {
            return Ok(secret.clone());
        }
        let secret = self.load_or_create_secret()?;
        Ok(self.secret.get_or_init(|| secret).clone())
    }

    fn open_storage(&self) -> StorageResult<Storage> {
        Storage::new(&self.db_path)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// In-memory provider for tests and throwaway sessions.
pub struct EphemeralPlatform {
    secret: String,
}

impl EphemeralPlatform {
    pub fn new() -> Self {
        Self::with_secret(crypto::generate_device_secret())
    }

    /// Provider with a fixed secret, for reproducible signatures.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl Default for EphemeralPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformProvider for EphemeralPlatform {
    fn device_secret(&self) -> Result<String, PlatformError> {
        Ok(self.secret.clone())
    }

    fn open_storage(&self) -> StorageResult<Storage> {
        Storage::in_memory()
    }
}

/// Ephemeral when `LEXIFLOW_EPHEMERAL` is set, native otherwise.
pub fn from_config(config: &Config) -> Arc<dyn PlatformProvider> {
    if config.ephemeral {
        Arc::new(EphemeralPlatform::new())
    } else {
        Arc::new(NativePlatform::new(&config.data_dir, &config.db_path))
    }
}

/// Compile target name, for diagnostics.
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "android")]
    return "android";

    #[cfg(target_os = "ios")]
    return "ios";

    #[cfg(target_os = "windows")]
    return "windows";

    #[cfg(target_os = "macos")]
    return "macos";

    #[cfg(target_os = "linux")]
    return "linux";

    #[cfg(not(any(
        target_os = "android",
        target_os = "ios",
        target_os = "windows",
        target_os = "macos",
        target_os = "linux"
    )))]
    return "unknown";
}
