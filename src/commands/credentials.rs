use anyhow::{Context, Result};
use router_session_core::AuthService;

pub async fn run_credentials_forget_command(service: &AuthService) -> Result<bool> {
    service
        .forget_credentials()
        .await
        .context("Failed to remove stored credentials")?;
    println!("Stored credentials removed");
    Ok(true)
}
