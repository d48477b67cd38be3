use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "journal").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("journal.db");

        Ok(Config { db_path, data_dir })
    }

    /// Load the JWT signing secret from disk, or generate a new one.
    ///
    /// Returns `(secret, newly_created)` where `newly_created` is true when a
    /// fresh secret was just generated (first run). Rotating the secret
    /// invalidates every outstanding token.
    pub fn load_or_create_jwt_secret(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("jwt_secret");

        if path.exists() {
            let secret =
                std::fs::read_to_string(&path).context("Failed to read JWT secret file")?;
            let secret = secret.trim().to_string();
            if !secret.is_empty() {
                return Ok((secret, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let secret = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &secret).context("Failed to write JWT secret file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set JWT secret file permissions")?;
        }
        eprintln!("Generated new JWT secret at {}", path.display());
        Ok((secret, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_secret_created_once_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db_path: dir.path().join("journal.db"),
            data_dir: dir.path().to_path_buf(),
        };

        let (first, created) = config.load_or_create_jwt_secret().unwrap();
        assert!(created);
        assert_eq!(first.len(), 64);

        let (second, created) = config.load_or_create_jwt_secret().unwrap();
        assert!(!created);
        assert_eq!(first, second);
    }
}
