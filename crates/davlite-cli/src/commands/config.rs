//! Config command - show or change persisted server settings.

use std::path::Path;

use anyhow::Result;
use clap::Args as ClapArgs;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use tracing::instrument;

use crate::config::Config;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Setting to change: auth, listen, storage, usersfile, realm, max-connections
    #[arg(requires = "value")]
    pub setting: Option<String>,

    /// New value for the setting
    pub value: Option<String>,
}

#[instrument(level = "info", name = "cmd::config", skip_all)]
pub fn execute(config_path: &Path, args: &Args) -> Result<()> {
    let mut config = Config::load_or_create(config_path)?;

    let (Some(setting), Some(value)) = (&args.setting, &args.value) else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec!["Setting", "Value"]);
        for (name, value) in config.entries() {
            table.add_row(vec![name.to_string(), value]);
        }
        println!("{table}");
        eprintln!("Configuration file: {}", config_path.display());
        return Ok(());
    };

    let message = config.set(setting, value)?;
    config.save(config_path)?;
    println!("{message}");
    eprintln!("Restart the server for the change to take effect.");
    Ok(())
}
