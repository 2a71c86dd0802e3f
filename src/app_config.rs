//! Configuration file loading for CLI defaults.
//!
//! The file is a flat list of `key = value` lines with `#` comments:
//!
//! ```text
//! base_url = "http://192.168.0.1"
//! persist_credentials = true
//! max_attempts = 4
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use router_session_core::{CookieStrategy, RouterConfig};

const APP_DIR: &str = "router-session";
const CONFIG_FILE: &str = "config.toml";
const STATE_DB_FILE: &str = "state.db";

/// Values read from the config file. Unset keys keep library defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub login_path: Option<String>,
    pub logout_path: Option<String>,
    pub probe_path: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub session_ttl_secs: Option<u64>,
    pub refresh_margin_secs: Option<u64>,
    pub persist_credentials: Option<bool>,
    pub session_cookie_pattern: Option<String>,
    pub cookie_strategy: Option<CookieStrategy>,
    pub audit_capacity: Option<usize>,
}

impl FileConfig {
    /// Overlays the values that are set onto `config`.
    pub fn apply_to(&self, config: &mut RouterConfig) {
        if let Some(value) = &self.base_url {
            config.base_url.clone_from(value);
        }
        if let Some(value) = &self.login_path {
            config.login_path.clone_from(value);
        }
        if let Some(value) = &self.logout_path {
            config.logout_path.clone_from(value);
        }
        if let Some(value) = &self.probe_path {
            config.probe_path.clone_from(value);
        }
        if let Some(secs) = self.timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = self.max_attempts {
            config.max_attempts = value;
        }
        if let Some(ms) = self.base_delay_ms {
            config.base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.session_ttl_secs {
            config.session_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = self.refresh_margin_secs {
            config.refresh_margin = Duration::from_secs(secs);
        }
        if let Some(value) = self.persist_credentials {
            config.persist_credentials = value;
        }
        if let Some(value) = &self.session_cookie_pattern {
            config.session_cookie_pattern.clone_from(value);
        }
        if let Some(value) = self.cookie_strategy {
            config.cookie_strategy = value;
        }
        if let Some(value) = self.audit_capacity {
            config.audit_capacity = value;
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Directory holding the config file and state database.
    pub dir: Option<PathBuf>,
    pub config: Option<FileConfig>,
}

impl LoadedConfig {
    /// Default state database location.
    #[must_use]
    pub fn state_db_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(STATE_DB_FILE))
    }
}

/// Resolves the default config directory.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/router-session`
/// 2. `$HOME/.config/router-session`
#[must_use]
pub fn resolve_default_config_dir() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join(APP_DIR))
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default location if the file exists.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let dir = resolve_default_config_dir();
    let Some(path) = dir.as_ref().map(|dir| dir.join(CONFIG_FILE)) else {
        return Ok(LoadedConfig { dir, config: None });
    };

    if !path.exists() {
        return Ok(LoadedConfig { dir, config: None });
    }

    let config = load_file_config(&path)?;
    Ok(LoadedConfig {
        dir,
        config: Some(config),
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "base_url" => cfg.base_url = Some(parse_string_literal(value).with_context(invalid)?),
            "login_path" => {
                cfg.login_path = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "logout_path" => {
                cfg.logout_path = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "probe_path" => {
                cfg.probe_path = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "session_cookie_pattern" => {
                cfg.session_cookie_pattern =
                    Some(parse_string_literal(value).with_context(invalid)?);
            }
            "cookie_strategy" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                let strategy = parsed
                    .parse::<CookieStrategy>()
                    .map_err(|e| anyhow!(e))
                    .with_context(invalid)?;
                cfg.cookie_strategy = Some(strategy);
            }
            "timeout_secs" => {
                cfg.timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "base_delay_ms" => {
                cfg.base_delay_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "session_ttl_secs" => {
                cfg.session_ttl_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "refresh_margin_secs" => {
                cfg.refresh_margin_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "max_attempts" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow!("max_attempts out of range for u32"))?;
                cfg.max_attempts = Some(n);
            }
            "audit_capacity" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let n = usize::try_from(parsed)
                    .map_err(|_| anyhow!("audit_capacity out of range for usize"))?;
                cfg.audit_capacity = Some(n);
            }
            "persist_credentials" => {
                cfg.persist_credentials = Some(parse_boolean(value).with_context(invalid)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow!("Integer value out of range for u64"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected boolean value: true or false"),
    }
}
