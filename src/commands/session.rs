//! Session command handlers: login, logout, status, verify, refresh.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use router_session_core::{AuthService, SessionInfo};
use tracing::{info, warn};

use super::short_id;
use crate::cli::LoginArgs;

pub async fn run_login_command(service: &AuthService, args: &LoginArgs) -> Result<bool> {
    let result = service.login(&args.username, &args.password).await;
    if let Some(session_id) = result.session_id() {
        println!("Logged in as {} (session {})", args.username, short_id(session_id));
        return Ok(true);
    }

    let category = result
        .error()
        .map_or("unknown", |category| category.as_str());
    println!(
        "Login failed [{category}]: {}",
        result.message().unwrap_or("no details")
    );
    Ok(false)
}

pub async fn run_logout_command(service: &AuthService) -> Result<bool> {
    if let Err(error) = service.logout().await {
        warn!(%error, "router did not acknowledge logout");
    }
    println!("Logged out");
    Ok(true)
}

/// Prints local session state. Always succeeds; `verify` is the command
/// whose exit code reports session validity.
pub fn run_status_command(service: &AuthService) -> Result<bool> {
    print_session(&service.session_info());
    Ok(true)
}

pub async fn run_verify_command(service: &AuthService) -> Result<bool> {
    let valid = service.verify_session().await;
    if valid {
        info!("session verified");
        println!("Session valid");
    } else {
        println!("Session invalid");
    }
    print_session(&service.session_info());
    Ok(valid)
}

pub async fn run_refresh_command(service: &AuthService) -> Result<bool> {
    let refreshed = service.refresh_session().await;
    println!(
        "{}",
        if refreshed {
            "Session refreshed"
        } else {
            "Session refresh failed"
        }
    );
    print_session(&service.session_info());
    Ok(refreshed)
}

fn print_session(info: &SessionInfo) {
    println!("State:    {}", info.state);
    if let Some(session_id) = &info.session_id {
        println!("Session:  {}", short_id(session_id));
    }
    if let Some(username) = &info.username {
        println!("User:     {username}");
    }
    if let Some(expires_at_ms) = info.expires_at_ms {
        let expires_at = UNIX_EPOCH + Duration::from_millis(expires_at_ms);
        let remaining = expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        println!(
            "Expires:  {} (in {}s)",
            httpdate::fmt_http_date(expires_at),
            remaining.as_secs()
        );
    }
}
