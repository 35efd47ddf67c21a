use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Overrides the per-user data directory.
pub const DATA_DIR_ENV: &str = "LARDER_DATA_DIR";
const API_KEY_FILE: &str = "api_key";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => ProjectDirs::from("", "", "larder")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        Self::in_dir(data_dir)
    }

    fn in_dir(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let db_path = data_dir.join("larder.db");
        Ok(Config { db_path, data_dir })
    }

    pub fn db_path_str(&self) -> Result<&str> {
        self.db_path
            .to_str()
            .with_context(|| format!("Database path is not valid UTF-8: {}", self.db_path.display()))
    }

    fn api_key_path(&self) -> PathBuf {
        self.data_dir.join(API_KEY_FILE)
    }

    /// The server's bearer token, generated and stored on first use.
    pub fn load_or_create_api_key(&self) -> Result<String> {
        let path = self.api_key_path();
        if let Some(key) = read_api_key(&path)? {
            return Ok(key);
        }

        let key = generate_api_key();
        std::fs::write(&path, &key)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to restrict API key file permissions")?;
        }
        info!(path = %path.display(), "generated new API key");
        eprintln!("New API key: {key}");
        eprintln!("Send it as: Authorization: Bearer {key}");
        Ok(key)
    }
}

/// `None` when the file is missing or blank.
fn read_api_key(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let key = raw.trim();
    Ok((!key.is_empty()).then(|| key.to_string()))
}

/// 32 random bytes as lowercase hex.
fn generate_api_key() -> String {
    use rand::Rng;
    use std::fmt::Write;

    let bytes: [u8; 32] = rand::rng().random();
    let mut key = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(key, "{b:02x}");
    }
    key
}
