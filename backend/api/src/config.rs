use clap::Parser;

/// Concord economic-engine API server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server port
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}
