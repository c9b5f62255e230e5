//! Glue between the shared config crate and this CLI: global-flag
//! overrides, output settings and the `config set` key table.

use std::path::PathBuf;

use clap::ValueEnum;

use smartgarden_config::{Config, ConfigError};
use smartgarden_core::ClientConfig;

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output::{Printer, should_color};

pub fn path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(smartgarden_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(smartgarden_config::load_config_from(&path(global))?)
}

/// Apply `--location` / `--timeout` and build the core client config.
pub fn client_config(cfg: &Config, global: &GlobalOpts) -> Result<ClientConfig, CliError> {
    let mut cfg = cfg.clone();
    if let Some(ref location) = global.location {
        cfg.location_id = Some(location.clone());
    }
    if let Some(timeout) = global.timeout {
        cfg.timeout_secs = timeout;
    }
    if cfg.application_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
        return Err(CliError::NoCredentials {
            path: path(global).display().to_string(),
        });
    }
    Ok(smartgarden_config::to_client_config(&cfg)?)
}

/// Flags win over `defaults.output` / `defaults.color` from the file.
pub fn printer(cfg: Option<&Config>, global: &GlobalOpts) -> Printer {
    let format = global
        .output
        .or_else(|| cfg.and_then(|c| OutputFormat::from_str(&c.defaults.output, true).ok()))
        .unwrap_or(OutputFormat::Table);
    let color = global
        .color
        .or_else(|| cfg.and_then(|c| ColorMode::from_str(&c.defaults.color, true).ok()))
        .unwrap_or(ColorMode::Auto);
    Printer {
        format,
        color: should_color(color),
        quiet: global.quiet,
    }
}

// ── config set ───────────────────────────────────────────────────────

fn number(key: &str, value: &str) -> Result<u64, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: key.into(),
        reason: format!("expected a whole number, got '{value}'"),
    })
}

fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

/// Set one camelCase key. `cfg` is left untouched if the result is invalid.
pub fn set_value(cfg: &mut Config, key: &str, value: &str) -> Result<(), CliError> {
    let mut next = cfg.clone();
    match key {
        "applicationKey" => next.application_key = optional(value),
        "applicationSecretEnv" => next.application_secret_env = optional(value),
        "locationId" => next.location_id = optional(value),
        "mowerDefaultDurationMinutes" => next.mower_default_duration_minutes = number(key, value)?,
        "wateringDefaultDurationMinutes" => {
            next.watering_default_duration_minutes = number(key, value)?;
        }
        "irrigationDefaultDurationMinutes" => {
            next.irrigation_default_duration_minutes = number(key, value)?;
        }
        "guardWindowSecs" => next.guard_window_secs = number(key, value)?,
        "timeoutSecs" => next.timeout_secs = number(key, value)?,
        "caCert" => next.ca_cert = optional(value).map(PathBuf::from),
        "authHost" => next.auth_host = optional(value),
        "smartHost" => next.smart_host = optional(value),
        "defaults.output" => {
            OutputFormat::from_str(value, true).map_err(|reason| CliError::Validation {
                field: key.into(),
                reason,
            })?;
            next.defaults.output = value.to_owned();
        }
        "defaults.color" => {
            ColorMode::from_str(value, true).map_err(|reason| CliError::Validation {
                field: key.into(),
                reason,
            })?;
            next.defaults.color = value.to_owned();
        }
        "applicationSecret" => {
            return Err(CliError::Validation {
                field: key.into(),
                reason: "use `smartgarden config set-secret` to store the secret".into(),
            });
        }
        _ => {
            return Err(CliError::Validation {
                field: "key".into(),
                reason: format!("unknown config key '{key}'"),
            });
        }
    }
    smartgarden_config::validate(&next).map_err(|err| match err {
        ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
        other => other.into(),
    })?;
    *cfg = next;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_value_updates_and_validates() {
        let mut cfg = Config::default();
        set_value(&mut cfg, "guardWindowSecs", "20").unwrap();
        assert_eq!(cfg.guard_window_secs, 20);

        set_value(&mut cfg, "locationId", "loc-1").unwrap();
        assert_eq!(cfg.location_id.as_deref(), Some("loc-1"));

        let err = set_value(&mut cfg, "mowerDefaultDurationMinutes", "0").unwrap_err();
        assert!(matches!(
            err,
            CliError::Validation { ref field, .. } if field == "mowerDefaultDurationMinutes"
        ));
        assert_eq!(cfg.mower_default_duration_minutes, 60);

        assert!(set_value(&mut cfg, "guardWindowSecs", "soon").is_err());
        assert!(set_value(&mut cfg, "colour", "x").is_err());
        assert!(set_value(&mut cfg, "applicationSecret", "s").is_err());
    }

    #[test]
    fn set_output_default_checks_format() {
        let mut cfg = Config::default();
        set_value(&mut cfg, "defaults.output", "json").unwrap();
        assert_eq!(cfg.defaults.output, "json");
        assert!(set_value(&mut cfg, "defaults.output", "xml").is_err());
    }
}
