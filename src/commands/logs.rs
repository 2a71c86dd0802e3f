//! Audit log command handlers.

use std::fs;

use anyhow::{Context, Result};
use router_session_core::{AuditEvent, AuditLogEntry, AuthService};
use tracing::info;

use super::short_id;
use crate::cli::LogsCommand;

pub async fn run_logs_command(service: &AuthService, command: &LogsCommand) -> Result<bool> {
    let audit = service.audit();
    match command {
        LogsCommand::Recent { count } => {
            let entries = audit.get_recent_logs(*count);
            if entries.is_empty() {
                println!("No audit entries recorded.");
            }
            for entry in &entries {
                println!("{}", render_entry(entry));
            }
        }
        LogsCommand::Stats => {
            let stats = audit.get_stats();
            println!("Total entries:     {}", stats.total);
            println!("Errors:            {}", stats.errors);
            println!("Retries:           {}", stats.retries);
            println!(
                "Auth events:       {} ({} successful)",
                stats.auths, stats.successful_auths
            );
            match stats.average_response_time_ms {
                Some(avg) => println!("Avg response time: {avg:.1} ms"),
                None => println!("Avg response time: n/a"),
            }
            for (kind, count) in &stats.error_kinds {
                println!("  {:<20} {count}", kind.as_str());
            }
        }
        LogsCommand::Export { output } => {
            let json = audit.export().context("Failed to serialize audit log")?;
            match output {
                Some(path) => {
                    fs::write(path, &json).with_context(|| {
                        format!("Failed to write audit export to '{}'", path.display())
                    })?;
                    info!(path = %path.display(), entries = audit.len(), "audit log exported");
                }
                None => println!("{json}"),
            }
        }
        LogsCommand::Clear => {
            audit.clear().await;
            println!("Audit log cleared");
        }
    }
    Ok(true)
}

fn render_entry(entry: &AuditLogEntry) -> String {
    let stamp = httpdate::fmt_http_date(
        std::time::UNIX_EPOCH + std::time::Duration::from_millis(entry.timestamp_ms),
    );
    let body = match &entry.event {
        AuditEvent::Request {
            request_id,
            method,
            url,
            attempt,
        } => format!("request  {} {method} {url} attempt={attempt}", short_id(request_id)),
        AuditEvent::Response {
            request_id,
            status,
            duration_ms,
            attempt,
            ..
        } => format!(
            "response {} status={status} {duration_ms}ms attempt={attempt}",
            short_id(request_id)
        ),
        AuditEvent::Retry {
            request_id,
            attempt,
            delay_ms,
            kind,
        } => format!(
            "retry    {} next_attempt={attempt} delay={delay_ms}ms kind={kind}",
            short_id(request_id)
        ),
        AuditEvent::Error {
            request_id,
            kind,
            message,
            attempt,
            ..
        } => format!(
            "error    {} kind={kind} attempt={attempt}: {message}",
            short_id(request_id)
        ),
        AuditEvent::Auth {
            action,
            success,
            detail,
            username,
            ..
        } => format!(
            "auth     {action} success={success} user={}: {detail}",
            username.as_deref().unwrap_or("-")
        ),
    };
    format!("#{:<4} {stamp} {body}", entry.id)
}
