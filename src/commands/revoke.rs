//! Revoke command: adds a user's certificate to the CRL.
use std::io::IsTerminal;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream::Stdout};

use srcprotect::ca::crl::RevocationOutcome;
use srcprotect::config::Config;
use srcprotect::session;

use crate::cli::RevokeArgs;

pub fn run_revoke(config: &Config, args: RevokeArgs) -> anyhow::Result<()> {
    let ca = super::start_authority(config)?;
    let certificate = session::load_user_certificate(&ca, &args.username)
        .with_context(|| format!("Cannot load certificate for '{}'", args.username))?;

    let skip_confirm = args.yes || !std::io::stdin().is_terminal();
    if !skip_confirm {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Revoke certificate {} of {} ({})?",
                certificate.serial_number(),
                args.username,
                args.reason
            ))
            .default(false)
            .interact()
            .map_err(|e| anyhow::anyhow!("prompt failed: {}", e))?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    match ca.revoke_certificate(&certificate, args.reason)? {
        RevocationOutcome::Revoked(entry) => println!(
            "{} {} (serial {}, {})",
            "Revoked".if_supports_color(Stdout, |t| t.green()),
            args.username,
            entry.serial_number,
            entry.reason
        ),
        RevocationOutcome::AlreadyRevoked(entry) => println!(
            "{} {} was already revoked at {} ({})",
            "Unchanged:".if_supports_color(Stdout, |t| t.yellow()),
            args.username,
            entry.revoked_at,
            entry.reason
        ),
    }
    Ok(())
}
