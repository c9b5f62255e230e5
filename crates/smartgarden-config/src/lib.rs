//! Configuration for smartgarden tools.
//!
//! TOML file + `SMARTGARDEN_*` environment overrides, credential
//! resolution (env var, keyring, plaintext), and translation to
//! `smartgarden_core::ClientConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
    value::{Uncased, UncasedStr},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use smartgarden_api::TransportConfig;
use smartgarden_core::{ClientConfig, DurationDefaults, Endpoints, LocationId};

const KEYRING_SERVICE: &str = "smartgarden";
const ENV_PREFIX: &str = "SMARTGARDEN_";
const MAX_DURATION_MINUTES: u64 = 24 * 60;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no application key configured")]
    NoApplicationKey,

    #[error("no application secret found for key '{application_key}'")]
    NoSecret { application_key: String },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config ─────────────────────────────────────────────────────

/// Top-level configuration. Keys are camelCase in TOML; environment
/// variables use `SMARTGARDEN_` plus the snake-case name, e.g.
/// `SMARTGARDEN_APPLICATION_KEY`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_key: Option<String>,

    /// Plaintext secret. Prefer the keyring or `applicationSecretEnv`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_secret: Option<String>,

    /// Name of an environment variable holding the secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_secret_env: Option<String>,

    /// Location to serve; the first one on the account when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,

    #[serde(default = "default_mower_minutes")]
    pub mower_default_duration_minutes: u64,

    #[serde(default = "default_watering_minutes")]
    pub watering_default_duration_minutes: u64,

    #[serde(default = "default_watering_minutes")]
    pub irrigation_default_duration_minutes: u64,

    /// Seconds an accepted command's effect is protected from push updates.
    #[serde(default = "default_guard_window")]
    pub guard_window_secs: u64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_host: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            application_key: None,
            application_secret: None,
            application_secret_env: None,
            location_id: None,
            mower_default_duration_minutes: default_mower_minutes(),
            watering_default_duration_minutes: default_watering_minutes(),
            irrigation_default_duration_minutes: default_watering_minutes(),
            guard_window_secs: default_guard_window(),
            timeout_secs: default_timeout(),
            ca_cert: None,
            auth_host: None,
            smart_host: None,
            defaults: Defaults::default(),
        }
    }
}

impl Config {
    /// Copy with the plaintext secret masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.application_secret.is_some() {
            copy.application_secret = Some("********".into());
        }
        copy
    }
}

/// CLI presentation defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_mower_minutes() -> u64 {
    60
}
fn default_watering_minutes() -> u64 {
    30
}
fn default_guard_window() -> u64 {
    10
}
fn default_timeout() -> u64 {
    30
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "smartgarden", "smartgarden").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("smartgarden");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Loading & saving ────────────────────────────────────────────────

/// `SMARTGARDEN_APPLICATION_KEY` → `applicationKey`.
fn env_key(key: &UncasedStr) -> Uncased<'_> {
    let mut out = String::with_capacity(key.len());
    let mut boundary = false;
    for c in key.as_str().chars() {
        if c == '_' {
            boundary = true;
        } else if boundary {
            out.push(c.to_ascii_uppercase());
            boundary = false;
        } else {
            out.push(c.to_ascii_lowercase());
        }
    }
    out.into()
}

/// Defaults, then the file at `path` (if present), then the environment.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).map(env_key).lowercase(false))
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(figment_for(path).extract()?)
}

/// Load the config from the canonical path and environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

/// Write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Credentials ─────────────────────────────────────────────────────

fn keyring_entry(application_key: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(
        KEYRING_SERVICE,
        &format!("{application_key}/secret"),
    )?)
}

/// Store the application secret in the OS keyring.
pub fn store_secret(application_key: &str, secret: &SecretString) -> Result<(), ConfigError> {
    keyring_entry(application_key)?.set_password(secret.expose_secret())?;
    Ok(())
}

/// Resolve the application secret.
///
/// Order: the variable named by `applicationSecretEnv`, the OS keyring,
/// then `applicationSecret` (from the file or `SMARTGARDEN_APPLICATION_SECRET`).
pub fn resolve_secret(cfg: &Config, application_key: &str) -> Result<SecretString, ConfigError> {
    if let Some(val) = cfg
        .application_secret_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
    {
        return Ok(SecretString::from(val));
    }

    if let Some(secret) = keyring_entry(application_key)
        .ok()
        .and_then(|entry| entry.get_password().ok())
    {
        return Ok(SecretString::from(secret));
    }

    if let Some(ref secret) = cfg.application_secret {
        return Ok(SecretString::from(secret.clone()));
    }

    Err(ConfigError::NoSecret {
        application_key: application_key.into(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

fn minutes(field: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 || value > MAX_DURATION_MINUTES {
        return Err(ConfigError::invalid(
            field,
            format!("expected 1..={MAX_DURATION_MINUTES} minutes, got {value}"),
        ));
    }
    Ok(value)
}

fn host(field: &str, value: Option<&str>, default: &str) -> Result<String, ConfigError> {
    let raw = value.unwrap_or(default);
    url::Url::parse(raw).map_err(|e| ConfigError::invalid(field, format!("invalid URL '{raw}': {e}")))?;
    Ok(raw.to_owned())
}

/// Validate everything except credentials.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    minutes("mowerDefaultDurationMinutes", cfg.mower_default_duration_minutes)?;
    minutes("wateringDefaultDurationMinutes", cfg.watering_default_duration_minutes)?;
    minutes("irrigationDefaultDurationMinutes", cfg.irrigation_default_duration_minutes)?;
    if cfg.guard_window_secs == 0 {
        return Err(ConfigError::invalid("guardWindowSecs", "must be at least 1"));
    }
    if cfg.timeout_secs == 0 {
        return Err(ConfigError::invalid("timeoutSecs", "must be at least 1"));
    }
    host("authHost", cfg.auth_host.as_deref(), smartgarden_api::DEFAULT_AUTH_HOST)?;
    host("smartHost", cfg.smart_host.as_deref(), smartgarden_api::DEFAULT_SMART_HOST)?;
    Ok(())
}

/// Build a `ClientConfig` around an already resolved secret.
pub fn client_config_with_secret(
    cfg: &Config,
    secret: SecretString,
) -> Result<ClientConfig, ConfigError> {
    validate(cfg)?;
    let key = cfg
        .application_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or(ConfigError::NoApplicationKey)?;

    let mut client = ClientConfig::new(key, secret)
        .with_durations(DurationDefaults {
            mower_minutes: cfg.mower_default_duration_minutes,
            watering_minutes: cfg.watering_default_duration_minutes,
            irrigation_minutes: cfg.irrigation_default_duration_minutes,
        })
        .with_guard_window(Duration::from_secs(cfg.guard_window_secs));
    if let Some(ref id) = cfg.location_id {
        client = client.with_location(LocationId::from(id.as_str()));
    }
    client.endpoints = Endpoints {
        auth: host("authHost", cfg.auth_host.as_deref(), smartgarden_api::DEFAULT_AUTH_HOST)?,
        smart: host("smartHost", cfg.smart_host.as_deref(), smartgarden_api::DEFAULT_SMART_HOST)?,
    };
    client.transport = TransportConfig {
        timeout: Duration::from_secs(cfg.timeout_secs),
        ca_cert: cfg.ca_cert.clone(),
        ..TransportConfig::default()
    };
    Ok(client)
}

/// Build a `ClientConfig`, resolving the secret through the credential chain.
pub fn to_client_config(cfg: &Config) -> Result<ClientConfig, ConfigError> {
    let key = cfg
        .application_key
        .as_deref()
        .ok_or(ConfigError::NoApplicationKey)?;
    let secret = resolve_secret(cfg, key)?;
    client_config_with_secret(cfg, secret)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(cfg.mower_default_duration_minutes, 60);
        assert_eq!(cfg.watering_default_duration_minutes, 30);
        assert_eq!(cfg.irrigation_default_duration_minutes, 30);
        assert_eq!(cfg.guard_window_secs, 10);
        assert_eq!(cfg.defaults.output, "table");
    }

    #[test]
    fn file_uses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
applicationKey = "key-1"
applicationSecret = "s3cret"
mowerDefaultDurationMinutes = 90
locationId = "loc-7"

[defaults]
output = "json"
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.application_key.as_deref(), Some("key-1"));
        assert_eq!(cfg.mower_default_duration_minutes, 90);
        assert_eq!(cfg.location_id.as_deref(), Some("loc-7"));
        assert_eq!(cfg.defaults.output, "json");

        let client = client_config_with_secret(&cfg, SecretString::from("x")).unwrap();
        assert_eq!(client.gate.durations.mower_minutes, 90);
        assert_eq!(client.location_id, Some(LocationId::from("loc-7")));
        assert_eq!(client.gate.guard_window, Duration::from_secs(10));
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
applicationKey = "from-file"
wateringDefaultDurationMinutes = 15
"#,
            )?;
            jail.set_env("SMARTGARDEN_APPLICATION_KEY", "from-env");
            jail.set_env("SMARTGARDEN_GUARD_WINDOW_SECS", "20");

            let cfg = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.application_key.as_deref(), Some("from-env"));
            assert_eq!(cfg.watering_default_duration_minutes, 15);
            assert_eq!(cfg.guard_window_secs, 20);
            Ok(())
        });
    }

    #[test]
    fn secret_from_named_env_var() {
        Jail::expect_with(|jail| {
            jail.set_env("GARDEN_SECRET_FOR_TEST", "env-secret");
            let cfg = Config {
                application_key: Some("key-1".into()),
                application_secret_env: Some("GARDEN_SECRET_FOR_TEST".into()),
                application_secret: Some("plain".into()),
                ..Config::default()
            };
            let secret = resolve_secret(&cfg, "key-1").map_err(|e| e.to_string())?;
            assert_eq!(secret.expose_secret(), "env-secret");
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cfg = Config {
            application_key: Some("key-1".into()),
            watering_default_duration_minutes: 0,
            ..Config::default()
        };
        let err = client_config_with_secret(&cfg, SecretString::from("x")).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "wateringDefaultDurationMinutes"));

        let cfg = Config {
            application_key: Some("key-1".into()),
            smart_host: Some("not a url".into()),
            ..Config::default()
        };
        assert!(validate(&cfg).is_err());

        let cfg = Config::default();
        assert!(matches!(
            client_config_with_secret(&cfg, SecretString::from("x")),
            Err(ConfigError::NoApplicationKey)
        ));
    }

    #[test]
    fn save_round_trips_and_redacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            application_key: Some("key-1".into()),
            application_secret: Some("s3cret".into()),
            ..Config::default()
        };
        save_config_to(&cfg, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("applicationKey = \"key-1\""));
        assert_eq!(load_config_from(&path).unwrap().application_key, cfg.application_key);
        assert_eq!(
            cfg.redacted().application_secret.as_deref(),
            Some("********")
        );
    }
}
