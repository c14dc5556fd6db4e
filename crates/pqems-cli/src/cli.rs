use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "pqems",
    about = "Post-quantum encryption with hardware-backed key storage",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Report which secure storage backend this host would use.
    Probe,
    /// Round-trip a probe record through the secure storage backend.
    Health,
    /// Generate a new key pair and store it, replacing any existing one.
    Keygen,
    /// Compress, protect and encrypt a file.
    Encrypt { input: PathBuf, output: PathBuf },
    /// Decrypt a file written by `encrypt`.
    Decrypt { input: PathBuf, output: PathBuf },
    /// Manage stored keys.
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeysCommand {
    /// Delete the stored key pair.
    Delete,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
