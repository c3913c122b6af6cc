use std::path::{Path, PathBuf};

use anyhow::Context;
use owo_colors::{OwoColorize, Stream::Stdout};

use srcprotect::config::{AppPaths, Config};
use srcprotect::envelope::{self, SealedEnvelope};
use srcprotect::keys::store;
use srcprotect::session;

use crate::cli::OpenArgs;

/// `<opener dir>/<file name without .encrypted>`; other names get `.decrypted`.
pub(crate) fn default_opened_path(paths: &AppPaths, opener: &str, input: &Path) -> anyhow::Result<PathBuf> {
    let name = input
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("{} has no file name", input.display()))?
        .to_string_lossy()
        .into_owned();
    let opened = match name.strip_suffix(".encrypted") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("{}.decrypted", name),
    };
    Ok(paths.user_dir(opener).join(opened))
}

pub fn run_open(config: &Config, args: OpenArgs) -> anyhow::Result<()> {
    let ca = super::start_authority(config)?;
    let registry = super::open_registry(config)?;

    let password = super::prompt_password(&format!("Password for {}", args.user), false)?;
    let receiver = session::login(&ca, &registry, &args.user, &password)
        .with_context(|| format!("Login failed for '{}'", args.user))?;

    let expected_sender = session::load_user_certificate(&ca, &args.from)
        .with_context(|| format!("Cannot resolve sender '{}'", args.from))?;
    super::require_acceptable(&ca, &expected_sender)?;

    let bytes = std::fs::read(&args.file).with_context(|| format!("Failed to read {}", args.file.display()))?;
    let sealed = SealedEnvelope::from_bytes(&bytes)?;
    let payload = match envelope::open(ca.provider(), &sealed, &receiver.key_pair, &expected_sender) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(receiver = %args.user, expected_sender = %args.from, error = %e, "rejected envelope");
            return Err(e.into());
        }
    };

    let output = match args.output {
        Some(path) => path,
        None => default_opened_path(ca.paths(), &args.user, &args.file)?,
    };
    store::write_atomic(&output, &payload, false)?;
    tracing::info!(
        receiver = %args.user,
        sender = %args.from,
        algorithm = %sealed.algorithm,
        output = %output.display(),
        "opened file"
    );

    println!(
        "{} {} from {} (signature verified)",
        "Opened".if_supports_color(Stdout, |t| t.green()),
        args.file.display(),
        args.from
    );
    println!("Output: {}", output.display());
    Ok(())
}
