//! CLI argument definitions for ironflow-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Ironflow flow telemetry collector.
///
/// Receives NetFlow v5/v9, IPFIX and sFlow v5 datagrams, decodes them into
/// normalized flow records and writes one JSON record per line to stdout.
#[derive(Parser, Debug)]
#[command(name = "ironflow-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to ironflow.toml configuration file.
    #[arg(short, long, default_value = "/etc/ironflow/ironflow.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}
