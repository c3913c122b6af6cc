use anyhow::Context;

use srcprotect::config::Config;
use srcprotect::keys::fingerprint;
use srcprotect::session;

use crate::cli::WhoamiArgs;
use crate::util::human_duration;

pub fn run_whoami(config: &Config, args: WhoamiArgs) -> anyhow::Result<()> {
    let ca = super::start_authority(config)?;
    let registry = super::open_registry(config)?;
    let password = super::prompt_password(&format!("Password for {}", args.username), false)?;
    let session = session::login(&ca, &registry, &args.username, &password)
        .with_context(|| format!("Login failed for '{}'", args.username))?;

    let cert = &session.certificate;
    let remaining = (cert.not_after() - chrono::Utc::now()).num_seconds().max(0) as u64;
    println!("Subject:     {}", cert.subject());
    println!("Issuer:      {}", cert.issuer());
    println!("Serial:      {}", cert.serial_number());
    println!("Fingerprint: {}", fingerprint::short_fingerprint(cert.public_key()));
    println!("Valid from:  {}", cert.not_before());
    println!("Valid until: {} ({} left)", cert.not_after(), human_duration(remaining));
    println!("Key file:    {}", ca.paths().user_key(&args.username).display());
    Ok(())
}
