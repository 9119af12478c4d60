//! Serve command - run the WebDAV server until interrupted.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use davlite::{Authenticator, CredentialStore, DavServer};
use tracing::{info, instrument, warn};

use crate::config::Config;

#[instrument(level = "info", name = "cmd::serve", skip_all)]
pub fn execute(config_path: &Path, quiet: bool) -> Result<()> {
    let config = Config::load_or_create(config_path)?;

    let authenticator: Option<Arc<dyn Authenticator>> = if config.require_auth {
        let store = CredentialStore::open(&config.users_file)?;
        Some(Arc::new(store))
    } else {
        warn!("Authentication is disabled");
        None
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(async move {
        let server_config = config.to_server_config();
        let server = DavServer::start(&server_config, authenticator)
            .await
            .with_context(|| {
                format!(
                    "Failed to start server on {} serving {}",
                    server_config.listen_address,
                    server_config.storage_root.display()
                )
            })?;

        if !quiet {
            print_banner(&config, config_path, &server);
        }

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Interrupt received, shutting down");
        if !quiet {
            eprintln!("\nShutting down...");
        }

        server.stop().await;
        Ok::<_, anyhow::Error>(())
    })
}

fn print_banner(config: &Config, config_path: &Path, server: &DavServer) {
    println!("davlite WebDAV server started");
    if config.require_auth {
        println!("  Authentication: ENABLED");
        println!("  Users file:     {}", config.users_file.display());
    } else {
        println!("  Authentication: DISABLED");
        println!("  WARNING: anyone who can reach {} can read and modify the storage", server.addr);
    }
    println!("  Storage path:   {}", server.storage_root().display());
    println!("  Config file:    {}", config_path.display());
    println!("  URL:            {}/", server.url());
    println!();
    println!("Press Ctrl+C to stop.");
}
