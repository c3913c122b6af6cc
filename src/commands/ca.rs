use owo_colors::{OwoColorize, Stream::Stdout};

use srcprotect::config::Config;
use srcprotect::keys::fingerprint;

use crate::cli::CaCommand;
use crate::util::human_duration;

pub fn run_ca(config: &Config, command: CaCommand) -> anyhow::Result<()> {
    match command {
        CaCommand::Init => run_init(config),
        CaCommand::Crl => run_crl(config),
    }
}

fn run_init(config: &Config) -> anyhow::Result<()> {
    let ca = super::start_authority(config)?;
    let root = ca.certificate();
    let remaining = (root.not_after() - chrono::Utc::now()).num_seconds().max(0) as u64;

    println!(
        "{}",
        "Certificate authority ready.".if_supports_color(Stdout, |t| t.green())
    );
    println!();
    println!("Subject:     {}", root.subject());
    println!("Serial:      {}", root.serial_number());
    println!("Fingerprint: {}", fingerprint::fingerprint(root.public_key()));
    println!("Valid until: {} ({} left)", root.not_after(), human_duration(remaining));
    println!("Certificate: {}", ca.paths().ca_certificate().display());
    println!("CRL:         {}", ca.paths().crl().display());
    Ok(())
}

fn run_crl(config: &Config) -> anyhow::Result<()> {
    use comfy_table::{Cell, Color, Table};

    let ca = super::start_authority(config)?;
    let crl = ca.crl();

    println!("Issuer:      {}", crl.body.issuer);
    println!("This update: {}", crl.this_update());
    if crl.entries().is_empty() {
        println!(
            "{}",
            "No revoked certificates.".if_supports_color(Stdout, |t| t.yellow())
        );
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Serial", "Revoked at", "Reason", "Code"]);
    for entry in crl.entries() {
        table.add_row(vec![
            Cell::new(entry.serial_number),
            Cell::new(entry.revoked_at.format("%Y-%m-%d %H:%M:%S UTC")),
            Cell::new(entry.reason).fg(Color::Red),
            Cell::new(entry.reason.code()),
        ]);
    }
    println!("{table}");
    Ok(())
}
