use adsync_core::{MemoryStore, MirrorStore, SyncJob, SyncSettings};
use adsync_integrations::{GraphApiClient, GraphApiConfig, PostgrestConfig};
use adsync_server::backends;
use adsync_server::cli::{Cli, Commands};
use adsync_server::config::ServerConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // JSON stdout logs unless ADSYNC_LOG_FORMAT=pretty.
    adsync_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    match cli.command.unwrap_or_else(Commands::default_serve) {
        Commands::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let settings = SyncSettings::from_env()?;
            let cfg = ServerConfig::from_env()?;
            let runtime = backends::build_runtime(&cfg, settings).await?;
            adsync_server::server::serve(addr, runtime).await?;
        }
        Commands::Sync {
            account_id,
            start_date,
            end_date,
            dry_run,
        } => {
            let job = match account_id {
                Some(id) => SyncJob::sync_account(id),
                None => SyncJob::sync_all(),
            }
            .with_dates(start_date, end_date);
            let memory = MemoryStore::new();
            let store: Arc<dyn MirrorStore> = if dry_run {
                Arc::new(memory.clone())
            } else {
                backends::postgrest_store()?
            };
            let engine = backends::build_engine(SyncSettings::from_env()?, store, None)?;
            let report = engine.run(&job).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if dry_run {
                for call in memory.calls().await {
                    println!("would upsert {} rows into {}", call.rows, call.table);
                }
            }
        }
        Commands::RefreshToken => {
            let client = GraphApiClient::new(GraphApiConfig::from_env()?)?;
            let exchanged = client.exchange_token().await?;
            println!("access_token: {}", exchanged.access_token);
            if let Some(secs) = exchanged.expires_in {
                let expires_at = chrono::Utc::now() + chrono::Duration::seconds(secs as i64);
                println!("expires_at: {expires_at}");
            }
        }
        Commands::Config => {
            println!("{:#?}", ServerConfig::from_env()?);
            println!("{:#?}", SyncSettings::from_env()?);
            match GraphApiConfig::from_env() {
                Ok(cfg) => println!("{cfg:#?}"),
                Err(e) => println!("graph api: {e}"),
            }
            match PostgrestConfig::from_env() {
                Ok(cfg) => println!("{cfg:#?}"),
                Err(e) => println!("store: {e}"),
            }
        }
    }

    Ok(())
}
