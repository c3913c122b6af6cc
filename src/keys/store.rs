//! KeyStore: atomic file persistence for certificates, CRLs and encrypted keys.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::ca::crl::RevocationList;
use crate::cert::Certificate;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::KdfParams;
use crate::error::{Result, SrcprotectError};

use super::{codec, KeyPair};

/// Write `contents` to `dest` atomically (write to temp then rename).
///
/// The temp file gets a unique name in the same directory, so concurrent
/// writers never share it and the rename never crosses a filesystem. When
/// `private` is set, the file is restricted to 0600 before it becomes visible
/// under its final name.
pub fn write_atomic(dest: &Path, contents: &[u8], private: bool) -> Result<()> {
    let parent = dest.parent().ok_or_else(|| {
        SrcprotectError::InvalidInput(format!("{} has no parent directory", dest.display()))
    })?;
    std::fs::create_dir_all(parent).map_err(|e| SrcprotectError::io(parent, e))?;

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| SrcprotectError::io(parent, e))?;

    tmp.write_all(contents).map_err(|e| SrcprotectError::io(tmp.path(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if private { 0o600 } else { 0o644 };
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))
            .map_err(|e| SrcprotectError::io(tmp.path(), e))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    // A failed persist drops the temp file, which removes it.
    tmp.persist(dest).map_err(|e| SrcprotectError::io(dest, e.error))?;
    Ok(())
}

/// Run `f` while holding an exclusive advisory lock on `<path>.lock`.
///
/// The lock is taken on a sibling file because `path` itself is replaced by
/// rename on every write. Other processes calling this for the same path
/// block until `f` returns.
pub fn with_exclusive_lock<T>(path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let lock_path = lock_path(path);
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SrcprotectError::io(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| SrcprotectError::io(&lock_path, e))?;
    let mut lock = fd_lock::RwLock::new(file);
    let _guard = lock.write().map_err(|e| SrcprotectError::io(&lock_path, e))?;
    f()
}

pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Check that a private key file has exactly 0600 permissions (Unix only).
///
/// The error message includes the remediation command.
#[cfg(unix)]
pub fn check_key_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path).map_err(|e| SrcprotectError::io(path, e))?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o600 {
        return Err(SrcprotectError::InvalidInput(format!(
            "Key file {} has insecure permissions {:04o} (expected 0600). Fix with: chmod 600 {}",
            path.display(),
            mode,
            path.display()
        )));
    }
    Ok(())
}

/// No-op permission check on non-Unix platforms.
#[cfg(not(unix))]
pub fn check_key_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| SrcprotectError::io(path, e))
}

pub fn save_certificate(path: &Path, certificate: &Certificate) -> Result<()> {
    write_atomic(path, codec::encode_certificate(certificate)?.as_bytes(), false)
}

/// Read a certificate file. A present but undecodable file is `StorageCorrupt`.
pub fn load_certificate(path: &Path) -> Result<Certificate> {
    let text = read_text(path)?;
    codec::decode_certificate(&text).map_err(|e| SrcprotectError::corrupt(path, e))
}

pub fn save_crl(path: &Path, crl: &RevocationList) -> Result<()> {
    write_atomic(path, codec::encode_crl(crl)?.as_bytes(), false)
}

/// Read the CRL file; `None` when no CRL has been written yet.
pub fn load_crl(path: &Path) -> Result<Option<RevocationList>> {
    match std::fs::read_to_string(path) {
        Ok(text) => codec::decode_crl(&text)
            .map(Some)
            .map_err(|e| SrcprotectError::corrupt(path, e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SrcprotectError::io(path, e)),
    }
}

pub fn save_private_key(path: &Path, key_pair: &KeyPair, passphrase: &str, params: &KdfParams) -> Result<()> {
    let armored = codec::encode_private_key(key_pair, passphrase, params)?;
    write_atomic(path, armored.as_bytes(), true)
}

/// Load and decrypt a private key file.
///
/// Rejects files readable by group or other before touching their contents.
/// A wrong passphrase is a `DecryptionFailure`; a file that is not an
/// armored key at all is `StorageCorrupt`.
pub fn load_private_key(path: &Path, passphrase: &str, provider: &impl CryptoProvider) -> Result<KeyPair> {
    check_key_permissions(path)?;
    let text = read_text(path)?;
    let seed = match codec::decode_private_key(&text, passphrase) {
        Ok(seed) => seed,
        Err(SrcprotectError::InvalidInput(detail)) => return Err(SrcprotectError::corrupt(path, detail)),
        Err(e) => return Err(e),
    };
    provider.key_pair_from_private(seed.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::StandardProvider;
    use crate::crypto::test_kdf;

    #[cfg(unix)]
    #[test]
    fn test_enforce_permissions_rejects_0644() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("alice_key.pem");
        std::fs::write(&path, "key").expect("write");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .expect("Failed to set permissions");
        let err_msg = check_key_permissions(&path)
            .expect_err("Expected error for 0644 permissions")
            .to_string();
        assert!(
            err_msg.contains("permissions"),
            "Error message should contain 'permissions', got: {}",
            err_msg
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_save_private_key_sets_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("alice_key.pem");
        let pair = StandardProvider.generate_key_pair();
        save_private_key(&path, &pair, "pw-alice", &test_kdf()).expect("save");
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "Expected 0600 permissions after atomic write, got {:04o}", mode);

        let loaded = load_private_key(&path, "pw-alice", &StandardProvider).expect("load");
        assert_eq!(loaded.public(), pair.public());
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("CRL.crl");
        write_atomic(&path, b"first", false).expect("first write");
        write_atomic(&path, b"second", false).expect("second write");
        assert_eq!(std::fs::read(&path).expect("read"), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[test]
    fn test_concurrent_writers_never_collide() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("CRL.crl");
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let body = vec![b'a' + i; 4096];
                    for _ in 0..25 {
                        write_atomic(&path, &body, false).expect("concurrent write");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        let written = std::fs::read(&path).expect("read");
        assert_eq!(written.len(), 4096);
        assert!(written.iter().all(|b| *b == written[0]), "file mixes two writers");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[test]
    fn test_exclusive_lock_serializes_critical_sections() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("CA").join("CRL.crl");
        let inside = Arc::new(AtomicBool::new(false));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        with_exclusive_lock(&path, || {
                            assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                            std::thread::sleep(std::time::Duration::from_millis(1));
                            inside.store(false, Ordering::SeqCst);
                            Ok(())
                        })
                        .expect("lock");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("locker thread");
        }
        assert!(lock_path(&path).exists());
        assert_eq!(lock_path(&path).file_name().and_then(|n| n.to_str()), Some("CRL.crl.lock"));
    }

    #[test]
    fn test_malformed_key_file_is_storage_corrupt() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("alice_key.pem");
        let pair = StandardProvider.generate_key_pair();
        save_private_key(&path, &pair, "pw-alice", &test_kdf()).expect("save");

        assert!(matches!(
            load_private_key(&path, "pw-wrong", &StandardProvider),
            Err(SrcprotectError::DecryptionFailure(_))
        ));

        let truncated = codec::pem_encode(codec::PRIVATE_KEY_LABEL, b"SRCPKENV\x01short");
        write_atomic(&path, truncated.as_bytes(), true).expect("write truncated");
        assert!(matches!(
            load_private_key(&path, "pw-alice", &StandardProvider),
            Err(SrcprotectError::StorageCorrupt { .. })
        ));

        let bad_magic = codec::pem_encode(codec::PRIVATE_KEY_LABEL, &[0x42; 96]);
        write_atomic(&path, bad_magic.as_bytes(), true).expect("write bad magic");
        assert!(matches!(
            load_private_key(&path, "pw-alice", &StandardProvider),
            Err(SrcprotectError::StorageCorrupt { .. })
        ));
    }

    #[test]
    fn test_load_crl_missing_is_none() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        assert!(load_crl(&dir.path().join("CRL.crl")).expect("load").is_none());
    }

    #[test]
    fn test_garbage_certificate_is_storage_corrupt() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("bob.cer");
        std::fs::write(&path, "not a certificate").expect("write");
        assert!(matches!(
            load_certificate(&path),
            Err(SrcprotectError::StorageCorrupt { .. })
        ));
    }
}
