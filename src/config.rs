//! Application configuration and the on-disk layout under the home directory.

use std::path::{Path, PathBuf};

use crate::crypto::KdfParams;
use crate::error::{Result, SrcprotectError};

/// Environment variable overriding the application home directory.
pub const HOME_ENV: &str = "SRCPROTECT_HOME";

const APP_DIR_NAME: &str = "srcprotect";

#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub kdf: KdfParams,
}

impl Config {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Resolve the home directory: explicit override, then `SRCPROTECT_HOME`,
    /// then `<Documents>/srcprotect`, then `<home>/srcprotect`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        if let Some(path) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(PathBuf::from(path)));
        }
        let base = dirs::document_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| SrcprotectError::InvalidInput("Cannot determine home directory".into()))?;
        Ok(Self::new(base.join(APP_DIR_NAME)))
    }

    pub fn paths(&self) -> AppPaths {
        AppPaths::new(&self.home)
    }
}

/// Stable, well-known file locations.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ca_dir(&self) -> PathBuf {
        self.root.join("CA")
    }

    pub fn ca_key(&self) -> PathBuf {
        self.ca_dir().join("CA_key.pem")
    }

    pub fn ca_certificate(&self) -> PathBuf {
        self.ca_dir().join("CA.cer")
    }

    pub fn crl(&self) -> PathBuf {
        self.ca_dir().join("CRL.crl")
    }

    pub fn users_dir(&self) -> PathBuf {
        self.root.join("Users")
    }

    pub fn users_file(&self) -> PathBuf {
        self.users_dir().join("users.txt")
    }

    pub fn user_dir(&self, username: &str) -> PathBuf {
        self.users_dir().join(username)
    }

    pub fn user_certificate(&self, username: &str) -> PathBuf {
        self.user_dir(username).join(format!("{username}.cer"))
    }

    pub fn user_key(&self, username: &str) -> PathBuf {
        self.user_dir(username).join(format!("{username}_key.pem"))
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("log_file.log")
    }

    /// Create the CA and user directories if they do not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.ca_dir(), self.users_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| SrcprotectError::io(&dir, e))?;
        }
        Ok(())
    }
}

/// Usernames become directory and file names, so they are kept to a safe alphabet.
pub fn validate_username(username: &str) -> Result<()> {
    let ok = !username.is_empty()
        && username.len() <= 64
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !username.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(SrcprotectError::InvalidInput(format!(
            "invalid username '{username}': use 1-64 letters, digits, '.', '_' or '-'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_well_known_names() {
        let paths = AppPaths::new("/data/srcprotect");
        assert_eq!(paths.ca_key(), Path::new("/data/srcprotect/CA/CA_key.pem"));
        assert_eq!(paths.ca_certificate(), Path::new("/data/srcprotect/CA/CA.cer"));
        assert_eq!(paths.crl(), Path::new("/data/srcprotect/CA/CRL.crl"));
        assert_eq!(
            paths.user_certificate("alice"),
            Path::new("/data/srcprotect/Users/alice/alice.cer")
        );
        assert_eq!(
            paths.user_key("alice"),
            Path::new("/data/srcprotect/Users/alice/alice_key.pem")
        );
    }

    #[test]
    fn test_explicit_home_wins() {
        let config = Config::resolve(Some(Path::new("/tmp/explicit"))).expect("resolve");
        assert_eq!(config.home, Path::new("/tmp/explicit"));
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("bob_2-x.y").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("../etc").is_err());
        assert!(validate_username(".hidden").is_err());
        assert!(validate_username("a/b").is_err());
    }
}
