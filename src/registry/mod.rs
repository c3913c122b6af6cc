//! Flat-file user registry: one `username::::password-hash` line per account.
//!
//! Password hashes are Argon2id PHC strings; the cost parameters travel inside
//! each string, so verification does not depend on the current `KdfParams`.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;
use tracing::info;

use crate::config::validate_username;
use crate::crypto::KdfParams;
use crate::error::{Result, SrcprotectError};
use crate::keys::store;

const SEPARATOR: &str = "::::";

#[derive(Debug)]
pub struct UserRegistry {
    path: PathBuf,
    users: BTreeMap<String, String>,
}

impl UserRegistry {
    /// Load the registry; a missing file is an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(SrcprotectError::io(path, e)),
        };

        let mut users = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (name, hash) = line
                .split_once(SEPARATOR)
                .ok_or_else(|| SrcprotectError::corrupt(path, format!("line {} has no separator", lineno + 1)))?;
            if name.is_empty() || hash.is_empty() {
                return Err(SrcprotectError::corrupt(path, format!("line {} is incomplete", lineno + 1)));
            }
            users.insert(name.to_string(), hash.to_string());
        }
        Ok(Self {
            path: path.to_path_buf(),
            users,
        })
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Reject names that are malformed or already taken.
    pub fn check_available(&self, username: &str) -> Result<()> {
        validate_username(username)?;
        if self.contains(username) {
            return Err(SrcprotectError::InvalidInput(format!("user '{}' already exists", username)));
        }
        Ok(())
    }

    /// `check_available` plus a non-empty password.
    pub fn check_new_account(&self, username: &str, password: &str) -> Result<()> {
        self.check_available(username)?;
        if password.is_empty() {
            return Err(SrcprotectError::InvalidInput("password must not be empty".into()));
        }
        Ok(())
    }

    /// Add an account and persist the registry.
    pub fn register(&mut self, username: &str, password: &str, params: &KdfParams) -> Result<()> {
        self.check_new_account(username, password)?;
        let hash = hash_password(password, params)?;
        self.users.insert(username.to_string(), hash);
        self.save()?;
        info!(username, "registered user");
        Ok(())
    }

    /// `false` for unknown users and wrong passwords alike.
    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        let Some(stored) = self.users.get(username) else {
            return Ok(false);
        };
        let parsed = PasswordHash::new(stored)
            .map_err(|e| SrcprotectError::corrupt(&self.path, format!("bad hash for '{}': {}", username, e)))?;
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    }

    fn save(&self) -> Result<()> {
        let mut out = String::new();
        for (name, hash) in &self.users {
            out.push_str(name);
            out.push_str(SEPARATOR);
            out.push_str(hash);
            out.push('\n');
        }
        store::write_atomic(&self.path, out.as_bytes(), true)
    }
}

fn hash_password(password: &str, params: &KdfParams) -> Result<String> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("salt encoding error: {}", e)))?;
    let hash = params
        .argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("password hashing error: {}", e)))?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_kdf;

    #[test]
    fn test_register_and_verify() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Users").join("users.txt");
        let mut registry = UserRegistry::load(&path).expect("load empty");
        assert!(registry.is_empty());

        registry.register("alice", "correct horse", &test_kdf()).expect("register");
        assert!(registry.verify_password("alice", "correct horse").expect("verify"));
        assert!(!registry.verify_password("alice", "battery staple").expect("verify"));
        assert!(!registry.verify_password("nobody", "correct horse").expect("verify"));

        let reloaded = UserRegistry::load(&path).expect("reload");
        assert!(reloaded.contains("alice"));
        assert!(reloaded.verify_password("alice", "correct horse").expect("verify"));
    }

    #[test]
    fn test_file_format_and_no_plaintext() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.txt");
        let mut registry = UserRegistry::load(&path).expect("load");
        registry.register("bob", "pw-bob-123", &test_kdf()).expect("register");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("bob::::$argon2id$"), "unexpected format: {}", text);
        assert!(!text.contains("pw-bob-123"));
    }

    #[test]
    fn test_duplicate_and_invalid_names_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = UserRegistry::load(&dir.path().join("users.txt")).expect("load");
        registry.register("carol", "pw", &test_kdf()).expect("register");

        assert!(matches!(
            registry.register("carol", "other", &test_kdf()),
            Err(SrcprotectError::InvalidInput(_))
        ));
        assert!(registry.register("", "pw", &test_kdf()).is_err());
        assert!(registry.register("../etc", "pw", &test_kdf()).is_err());
        assert!(registry.register("dave", "", &test_kdf()).is_err());
        assert_eq!(registry.usernames().collect::<Vec<_>>(), vec!["carol"]);
    }

    #[test]
    fn test_malformed_line_is_storage_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.txt");
        std::fs::write(&path, "alice::::$argon2id$x\nbroken line\n").expect("write");
        assert!(matches!(
            UserRegistry::load(&path),
            Err(SrcprotectError::StorageCorrupt { .. })
        ));
    }
}
