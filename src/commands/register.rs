use anyhow::Context;
use owo_colors::{OwoColorize, Stream::Stdout};

use srcprotect::config::Config;
use srcprotect::session;

use crate::cli::RegisterArgs;

pub fn run_register(config: &Config, args: RegisterArgs) -> anyhow::Result<()> {
    let ca = super::start_authority(config)?;
    let mut registry = super::open_registry(config)?;
    registry.check_available(&args.username)?;

    let password = super::prompt_password(&format!("New password for {}", args.username), true)?;
    let certificate = session::provision_user(&ca, &mut registry, &args.username, &password)
        .with_context(|| format!("Failed to create account '{}'", args.username))?;

    println!(
        "{}",
        "Account created.".if_supports_color(Stdout, |t| t.green())
    );
    println!();
    println!("Subject:     {}", certificate.subject());
    println!("Serial:      {}", certificate.serial_number());
    println!("Valid until: {}", certificate.not_after());
    println!("Directory:   {}", ca.paths().user_dir(&args.username).display());
    Ok(())
}
