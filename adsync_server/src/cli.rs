use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "adsync", version, about = "Facebook Ads to Postgres mirror")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP trigger, job consumer and scheduler (default if no subcommand given).
    Serve {
        #[arg(long, env = "ADSYNC_HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "ADSYNC_PORT", default_value = "8000")]
        port: u16,
    },

    /// Run one sync job inline and print its report.
    ///
    /// Without `--account-id` this is a `sync_all`.
    Sync {
        #[arg(long)]
        account_id: Option<String>,
        /// First day of the insights window (YYYY-MM-DD).
        #[arg(long)]
        start_date: Option<String>,
        /// Last day of the insights window (YYYY-MM-DD).
        #[arg(long)]
        end_date: Option<String>,
        /// Write into an in-memory store instead of Postgres.
        #[arg(long)]
        dry_run: bool,
    },

    /// Exchange FACEBOOK_ACCESS_TOKEN for a long-lived token and print it.
    RefreshToken,

    /// Print current configuration (redacted secrets).
    Config,
}

impl Commands {
    pub fn default_serve() -> Self {
        Commands::Serve {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}
