use clap::Parser;

/// Service monitor CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "service-monitor",
    version,
    about = "Uptime, certificate, domain and heartbeat monitoring"
)]
pub struct Cli {
    /// SQLite database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Address the HTTP API listens on
    #[arg(long)]
    pub bind: Option<String>,

    /// Monitoring sweep interval in seconds
    #[arg(long)]
    pub sweep_interval: Option<u64>,

    /// Per-request HTTP check timeout in seconds
    #[arg(long)]
    pub http_timeout: Option<u64>,

    /// Register tasks disabled; they can still be run on demand
    #[arg(long)]
    pub no_scheduler: bool,
}
