use std::path::{Path, PathBuf};

use anyhow::Context;
use owo_colors::{OwoColorize, Stream::Stdout};

use srcprotect::config::{AppPaths, Config};
use srcprotect::envelope;
use srcprotect::keys::store;
use srcprotect::session;

use crate::cli::SealArgs;

/// `<recipient dir>/<file name>.encrypted`
pub(crate) fn default_sealed_path(paths: &AppPaths, recipient: &str, input: &Path) -> anyhow::Result<PathBuf> {
    let name = input
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("{} has no file name", input.display()))?;
    Ok(paths
        .user_dir(recipient)
        .join(format!("{}.encrypted", name.to_string_lossy())))
}

pub fn run_seal(config: &Config, args: SealArgs) -> anyhow::Result<()> {
    let ca = super::start_authority(config)?;
    let registry = super::open_registry(config)?;

    let password = super::prompt_password(&format!("Password for {}", args.user), false)?;
    let sender = session::login(&ca, &registry, &args.user, &password)
        .with_context(|| format!("Login failed for '{}'", args.user))?;

    let recipient = session::load_user_certificate(&ca, &args.to)
        .with_context(|| format!("Cannot resolve recipient '{}'", args.to))?;
    super::require_acceptable(&ca, &recipient)?;

    let payload = std::fs::read(&args.file).with_context(|| format!("Failed to read {}", args.file.display()))?;
    let sealed = envelope::seal(
        ca.provider(),
        &payload,
        &sender.key_pair,
        &sender.certificate,
        &recipient,
        args.algorithm,
    )?;

    let output = match args.output {
        Some(path) => path,
        None => default_sealed_path(ca.paths(), &args.to, &args.file)?,
    };
    store::write_atomic(&output, &sealed.to_bytes()?, false)?;
    tracing::info!(
        sender = %args.user,
        recipient = %args.to,
        algorithm = %args.algorithm,
        output = %output.display(),
        "sealed file"
    );

    println!(
        "{} {} for {} ({})",
        "Sealed".if_supports_color(Stdout, |t| t.green()),
        args.file.display(),
        args.to,
        args.algorithm
    );
    println!("Output: {}", output.display());
    Ok(())
}
