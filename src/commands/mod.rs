pub mod ca;
pub mod open;
pub mod register;
pub mod revoke;
pub mod seal;
pub mod whoami;

use std::io::{self, BufRead, IsTerminal};
use std::sync::Arc;

use anyhow::Context;
use zeroize::Zeroizing;

use srcprotect::ca::CertificateAuthority;
use srcprotect::cert::{Certificate, Verdict};
use srcprotect::config::Config;
use srcprotect::registry::UserRegistry;

/// Start CA initialization in the background and wait for it.
pub(crate) fn start_authority(config: &Config) -> anyhow::Result<Arc<CertificateAuthority>> {
    let pending = CertificateAuthority::spawn_initialize(config.clone())?;
    pending.wait().context("Certificate authority is unavailable")
}

pub(crate) fn open_registry(config: &Config) -> anyhow::Result<UserRegistry> {
    let path = config.paths().users_file();
    UserRegistry::load(&path).with_context(|| format!("Failed to read user registry {}", path.display()))
}

/// Prompt for a password, or read one line from stdin when it is not a terminal.
pub(crate) fn prompt_password(prompt: &str, confirm: bool) -> anyhow::Result<Zeroizing<String>> {
    if !io::stdin().is_terminal() {
        let mut line = Zeroizing::new(String::new());
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read password from stdin")?;
        let trimmed = Zeroizing::new(line.trim_end_matches(['\r', '\n']).to_string());
        if trimmed.is_empty() {
            anyhow::bail!("No password received on stdin");
        }
        return Ok(trimmed);
    }

    let mut input = dialoguer::Password::new().with_prompt(prompt);
    if confirm {
        input = input.with_confirmation("Confirm password", "Passwords don't match");
    }
    let password = input
        .interact()
        .map_err(|e| anyhow::anyhow!("Password prompt failed: {}", e))?;
    Ok(Zeroizing::new(password))
}

/// Refuse to exchange files with a party whose certificate is not currently valid.
pub(crate) fn require_acceptable(ca: &CertificateAuthority, certificate: &Certificate) -> anyhow::Result<()> {
    match ca.is_acceptable(certificate) {
        Verdict::Valid => Ok(()),
        verdict => anyhow::bail!(
            "Certificate of '{}' (serial {}) is not acceptable: {:?}",
            certificate.common_name(),
            certificate.serial_number(),
            verdict
        ),
    }
}
