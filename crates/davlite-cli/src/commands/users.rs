//! User management commands - add, remove and list accounts in the
//! credentials file.

use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Args as ClapArgs;
use comfy_table::Table;
use davlite::CredentialStore;
use thiserror::Error;
use tracing::instrument;

use crate::config::Config;

/// Errors specific to user management.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("User '{0}' not found")]
    NotFound(String),
}

#[derive(ClapArgs, Clone)]
pub struct AddArgs {
    /// Account name (must not contain ':')
    pub username: String,

    /// Password (prompted for when omitted)
    pub password: Option<String>,
}

#[derive(ClapArgs, Clone)]
pub struct RemoveArgs {
    /// Account name to remove
    pub username: String,
}

fn open_store(config_path: &Path) -> Result<CredentialStore> {
    let config = Config::load_or_create(config_path)?;
    Ok(CredentialStore::open(&config.users_file)?)
}

#[instrument(level = "info", name = "cmd::add_user", skip_all, fields(username = %args.username))]
pub fn add(config_path: &Path, args: &AddArgs) -> Result<()> {
    let store = open_store(config_path)?;

    let password = match &args.password {
        Some(password) => password.clone(),
        None => prompt_new_password(&args.username)?,
    };
    if password.is_empty() {
        bail!("Password must not be empty");
    }

    let existed = store.usernames().contains(&args.username);
    store.add_user(&args.username, &password)?;

    if existed {
        println!("Password updated for user '{}'.", args.username);
    } else {
        println!("User '{}' added successfully.", args.username);
    }
    Ok(())
}

#[instrument(level = "info", name = "cmd::remove_user", skip_all, fields(username = %args.username))]
pub fn remove(config_path: &Path, args: &RemoveArgs) -> Result<()> {
    let store = open_store(config_path)?;
    if !store.remove_user(&args.username)? {
        return Err(UserError::NotFound(args.username.clone()).into());
    }
    println!("User '{}' removed successfully.", args.username);
    Ok(())
}

#[instrument(level = "info", name = "cmd::list_users", skip_all)]
pub fn list(config_path: &Path) -> Result<()> {
    let store = open_store(config_path)?;
    let names = store.usernames();

    if names.is_empty() {
        eprintln!("No users configured in {}.", store.path().display());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Username"]);
    for name in &names {
        table.add_row(vec![name.as_str()]);
    }
    println!("{table}");
    eprintln!("{} user(s) in {}", names.len(), store.path().display());
    Ok(())
}

fn prompt_new_password(username: &str) -> Result<String> {
    let first = rpassword::prompt_password(format!("Password for '{username}': "))
        .context("Failed to read password")?;
    let second = rpassword::prompt_password("Confirm password: ").context("Failed to read password")?;
    if first != second {
        bail!("Passwords do not match");
    }
    Ok(first)
}
