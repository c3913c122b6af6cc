use std::path::PathBuf;

use clap::{Parser, Subcommand};

use srcprotect::ca::crl::RevocationReason;
use srcprotect::crypto::symmetric::SymmetricAlgorithm;

#[derive(Parser)]
#[command(
    name = "srcprotect",
    version,
    about = "Exchange source files confidentially between users of a private certificate authority"
)]
pub struct Cli {
    /// Application data directory (default: $SRCPROTECT_HOME or ~/Documents/srcprotect)
    #[arg(long, global = true, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Certificate authority maintenance
    #[command(subcommand)]
    Ca(CaCommand),
    /// Create a user account with a fresh key pair and certificate
    Register(RegisterArgs),
    /// Log in and show the user's certificate
    Whoami(WhoamiArgs),
    /// Sign a file as one user and encrypt it for another
    Seal(SealArgs),
    /// Decrypt a sealed file and verify its sender
    Open(OpenArgs),
    /// Revoke a user's certificate
    Revoke(RevokeArgs),
}

#[derive(Subcommand)]
pub enum CaCommand {
    /// Load the CA, bootstrapping a new one if none exists
    Init,
    /// List the certificate revocation list
    Crl,
}

#[derive(Parser)]
pub struct RegisterArgs {
    #[arg(value_name = "USER")]
    pub username: String,
}

#[derive(Parser)]
pub struct WhoamiArgs {
    #[arg(value_name = "USER")]
    pub username: String,
}

#[derive(Parser)]
pub struct SealArgs {
    /// Sending user (prompts for their password)
    #[arg(long, value_name = "USER")]
    pub user: String,

    /// Receiving user
    #[arg(long, value_name = "USER")]
    pub to: String,

    /// Content cipher: aes128-gcm, aes256-gcm or chacha20-poly1305
    #[arg(long, default_value_t = SymmetricAlgorithm::default())]
    pub algorithm: SymmetricAlgorithm,

    /// File to seal
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output path (default: <FILE>.encrypted in the recipient's directory)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Parser)]
pub struct OpenArgs {
    /// Receiving user (prompts for their password)
    #[arg(long, value_name = "USER")]
    pub user: String,

    /// Expected sender
    #[arg(long, value_name = "USER")]
    pub from: String,

    /// Sealed file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Output path (default: FILE without .encrypted, in the receiver's directory)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Parser)]
pub struct RevokeArgs {
    #[arg(value_name = "USER")]
    pub username: String,

    /// RFC 5280 reason, e.g. key-compromise, superseded, privilege-withdrawn
    #[arg(long, default_value_t = RevocationReason::Unspecified)]
    pub reason: RevocationReason,

    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}
