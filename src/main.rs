//! CLI entry point for the router session tool.

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use router_session_core::secrets::MASTER_KEY_ENV;
use router_session_core::{
    AuthService, EncryptedSecretStore, KeyValueStore, KeyringSecretStore, MemorySecretStore,
    RouterConfig, SecretStore, SqliteKeyValueStore,
};
use tracing::{debug, warn};

mod app_config;
mod cli;
mod commands;

use cli::{Cli, Command, CredentialBackend, CredentialsCommand};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(command = ?cli.command, "CLI arguments parsed");

    let loaded = app_config::load_default_file_config()?;
    let mut config = RouterConfig::default();
    if let Some(file_config) = &loaded.config {
        file_config.apply_to(&mut config);
    }
    apply_cli_overrides(&cli, &mut config);
    config.validate().context("Invalid router configuration")?;

    let Some(db_path) = cli.router.state_db.clone().or_else(|| loaded.state_db_path()) else {
        bail!(
            "Unable to determine config directory (set XDG_CONFIG_HOME or HOME, or pass --state-db)"
        );
    };
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory '{}'", parent.display()))?;
    }
    let kv: Arc<dyn KeyValueStore> = Arc::new(
        SqliteKeyValueStore::open(&db_path)
            .await
            .with_context(|| format!("Failed to open state database '{}'", db_path.display()))?,
    );

    let managing_credentials = matches!(cli.command, Command::Credentials { .. });
    let secrets = secret_store_for(
        &config,
        cli.router.credential_store,
        managing_credentials,
        Arc::clone(&kv),
    );
    let service = AuthService::builder(config)
        .key_value_store(kv)
        .secret_store(secrets)
        .build()
        .await?;

    let ok = match &cli.command {
        Command::Login(args) => commands::run_login_command(&service, args).await?,
        Command::Logout => commands::run_logout_command(&service).await?,
        Command::Status => commands::run_status_command(&service)?,
        Command::Verify => commands::run_verify_command(&service).await?,
        Command::Refresh => commands::run_refresh_command(&service).await?,
        Command::Logs { command } => commands::run_logs_command(&service, command).await?,
        Command::Credentials { command } => match command {
            CredentialsCommand::Forget => {
                commands::run_credentials_forget_command(&service).await?
            }
        },
    };

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn apply_cli_overrides(cli: &Cli, config: &mut RouterConfig) {
    let router = &cli.router;
    if let Some(base_url) = &router.base_url {
        config.base_url.clone_from(base_url);
    }
    if let Some(strategy) = router.cookie_strategy {
        config.cookie_strategy = strategy;
    }
    if router.persist_credentials {
        config.persist_credentials = true;
    }
    if let Some(max_attempts) = router.max_attempts {
        config.max_attempts = max_attempts;
    }
}

/// Durable credentials when persistence is wanted, a master key is
/// configured, or the command manages credentials. Otherwise nothing
/// outlives the process.
fn secret_store_for(
    config: &RouterConfig,
    backend: CredentialBackend,
    managing_credentials: bool,
    kv: Arc<dyn KeyValueStore>,
) -> Arc<dyn SecretStore> {
    let wanted = config.persist_credentials
        || managing_credentials
        || std::env::var_os(MASTER_KEY_ENV).is_some();
    if !wanted {
        return Arc::new(MemorySecretStore::new());
    }
    if backend == CredentialBackend::Keychain {
        return Arc::new(KeyringSecretStore::new());
    }
    match EncryptedSecretStore::from_environment(kv) {
        Ok(store) => Arc::new(store),
        Err(error) => {
            warn!(%error, "credential persistence unavailable; credentials will not be stored");
            Arc::new(MemorySecretStore::new())
        }
    }
}
