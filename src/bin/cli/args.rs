use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser)]
#[command(name = "px-subscribe")]
#[command(version)]
#[command(about = "Subscribe to pxGrid topics over STOMP/WebSocket and print notifications")]
pub struct Cli {
    /// pubsub WebSocket URL (ws:// or wss://)
    #[arg(long)]
    pub url: String,

    /// Client node name (user for Basic authentication)
    #[arg(short = 'n', long)]
    pub nodename: String,

    /// Password for Basic authentication
    #[arg(short = 'w', long, default_value = "")]
    pub password: String,

    /// STOMP virtual host (defaults to the URL host)
    #[arg(long)]
    pub host: Option<String>,

    /// Topics to subscribe to (can be specified multiple times)
    #[arg(long, required = true)]
    pub topic: Vec<String>,

    /// Publish this message once to each topic after subscribing
    #[arg(long)]
    pub send: Option<String>,

    /// Client certificate chain (PEM)
    #[arg(short = 'c', long)]
    pub clientcert: Option<PathBuf>,

    /// Client private key (PEM); read from the certificate file if omitted
    #[arg(short = 'k', long)]
    pub clientkey: Option<PathBuf>,

    /// Server CA bundle (PEM); takes precedence over --insecure
    #[arg(short = 's', long)]
    pub servercert: Option<PathBuf>,

    /// Do not verify the server certificate
    #[arg(long)]
    pub insecure: bool,

    /// WebSocket ping interval in seconds (0 disables)
    #[arg(long, default_value = "20", value_parser = parse_ping_interval)]
    pub ws_ping_interval: Duration,

    /// Treat broker ERROR frames as fatal
    #[arg(long)]
    pub fail_on_error: bool,

    /// Exit after this many messages
    #[arg(long)]
    pub count: Option<u64>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Seconds as a non-negative, finite number.
fn parse_ping_interval(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("'{}' must be a finite, non-negative number of seconds", value))
}
