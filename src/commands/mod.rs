//! CLI command handlers.
//!
//! Each handler returns `Ok(true)` when the command achieved what it was
//! asked to do; `main` maps `false` to a non-zero exit code.

mod credentials;
mod logs;
mod session;

pub use credentials::run_credentials_forget_command;
pub use logs::run_logs_command;
pub use session::{
    run_login_command, run_logout_command, run_refresh_command, run_status_command,
    run_verify_command,
};

/// Short prefix of a session id for terminal output.
fn short_id(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(6).collect();
    if prefix.len() < session_id.len() {
        format!("{prefix}...")
    } else {
        prefix
    }
}
