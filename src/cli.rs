//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use router_session_core::CookieStrategy;

/// Manage an authenticated session with a router's admin interface.
///
/// Logs in, keeps the session alive across invocations, verifies it, and
/// records every request and authentication step in a bounded audit log.
#[derive(Parser, Debug)]
#[command(name = "router-session")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub router: RouterArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for values from the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct RouterArgs {
    /// Router admin URL, e.g. http://192.168.1.1
    #[arg(long, env = "ROUTER_SESSION_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// How the outbound cookie set is kept (header or jar)
    #[arg(long, global = true)]
    pub cookie_strategy: Option<CookieStrategy>,

    /// Store credentials (encrypted) so expired sessions can be recovered
    #[arg(long, global = true)]
    pub persist_credentials: bool,

    /// Where stored credentials live
    #[arg(long, global = true, value_enum, default_value_t = CredentialBackend::Encrypted)]
    pub credential_store: CredentialBackend,

    /// Maximum attempts per router call (1-10)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,

    /// Path of the state database (defaults to <config dir>/state.db)
    #[arg(long, global = true)]
    pub state_db: Option<PathBuf>,
}

/// Backend for persisted credentials.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialBackend {
    /// Encrypted in the state database, key held in the OS keychain
    #[default]
    Encrypted,
    /// Directly in the OS keychain
    Keychain,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and persist the session
    Login(LoginArgs),
    /// Log out on the router and clear local state
    Logout,
    /// Show the current session without contacting the router
    Status,
    /// Check the session with the router (auto-login when enabled)
    Verify,
    /// Refresh the session lifetime (auto-login when enabled)
    Refresh,
    /// Inspect the audit log
    Logs {
        #[command(subcommand)]
        command: LogsCommand,
    },
    /// Manage stored credentials
    Credentials {
        #[command(subcommand)]
        command: CredentialsCommand,
    },
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Router admin username
    #[arg(short, long, default_value = "admin")]
    pub username: String,

    /// Router admin password
    #[arg(short, long, env = "ROUTER_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Subcommand, Debug)]
pub enum LogsCommand {
    /// Show the most recent entries, oldest first
    Recent {
        /// Number of entries
        #[arg(default_value_t = 20)]
        count: usize,
    },
    /// Show aggregate statistics
    Stats,
    /// Export the log as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete all entries
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum CredentialsCommand {
    /// Delete stored credentials
    Forget,
}
