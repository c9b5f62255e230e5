//! Config subcommand handlers. None of these need credentials.

use std::io::{self, BufRead, Write};

use secrecy::{ExposeSecret, SecretString};

use smartgarden_config::{Config, save_config_to, store_secret};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;

// ── Prompts ─────────────────────────────────────────────────────────

fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Read one line from stdin, falling back to `default` on empty input.
fn prompt(label: &str, default: Option<&str>) -> Result<String, CliError> {
    if let Some(d) = default {
        eprint!("{label} [{d}]: ");
    } else {
        eprint!("{label}: ");
    }
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).map_err(prompt_err)?;
    let line = line.trim();
    Ok(match (line.is_empty(), default) {
        (true, Some(d)) => d.to_owned(),
        _ => line.to_owned(),
    })
}

fn prompt_secret() -> Result<SecretString, CliError> {
    let secret = rpassword::prompt_password("Application secret: ").map_err(prompt_err)?;
    if secret.is_empty() {
        return Err(CliError::Validation {
            field: "applicationSecret".into(),
            reason: "secret cannot be empty".into(),
        });
    }
    Ok(SecretString::from(secret))
}

fn store_in_keyring(key: &str, secret: &SecretString) -> Result<(), CliError> {
    store_secret(key, secret)?;
    eprintln!("   ✓ Secret stored in system keyring");
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::path(global);

    match args.command {
        ConfigCommand::Init { plaintext } => {
            let mut cfg = read_file(&path)?;
            eprintln!("GARDENA smart system setup");
            eprintln!("   Config path: {}\n", path.display());

            let key = prompt("Application key", cfg.application_key.as_deref())?;
            if key.is_empty() {
                return Err(CliError::Validation {
                    field: "applicationKey".into(),
                    reason: "application key cannot be empty".into(),
                });
            }
            let secret = prompt_secret()?;
            if plaintext {
                cfg.application_secret = Some(secret.expose_secret().to_owned());
            } else {
                store_in_keyring(&key, &secret)?;
                cfg.application_secret = None;
            }
            cfg.application_key = Some(key);

            let location = prompt(
                "Location ID (empty for the first location)",
                cfg.location_id.as_deref(),
            )?;
            cfg.location_id = (!location.is_empty()).then_some(location);

            save_config_to(&cfg, &path)?;
            eprintln!("\n✓ Configuration written to {}", path.display());
            eprintln!("\n  Test it: smartgarden devices list");
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let printer = config::printer(Some(&cfg), global);
            let shown = cfg.redacted();
            printer.single(
                &shown,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("<{e}>")),
                |_| path.display().to_string(),
            )
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }

        ConfigCommand::Set { key, value } => {
            let mut cfg = read_file(&path)?;
            config::set_value(&mut cfg, &key, &value)?;
            save_config_to(&cfg, &path)?;
            if !global.quiet {
                eprintln!("✓ {key} updated in {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::SetSecret => {
            let cfg = config::load(global)?;
            let key = cfg
                .application_key
                .clone()
                .ok_or_else(|| CliError::NoCredentials {
                    path: path.display().to_string(),
                })?;
            let secret = prompt_secret()?;
            store_in_keyring(&key, &secret)
        }
    }
}

/// The file alone, without environment overrides, so `set` never
/// persists values that came from the environment.
fn read_file(path: &std::path::Path) -> Result<Config, CliError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| CliError::Validation {
        field: "config".into(),
        reason: format!("{}: {e}", path.display()),
    })
}
