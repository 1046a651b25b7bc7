//! Runtime configuration.
//!
//! Settings come from a JSON file (by default `config.json` in the platform
//! config directory under `tickler/`), then `TICKLER_*` environment
//! variables override individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tickler_smtp::{Address, Credentials, Mailbox};

use crate::{Error, Result};

const APP_DIR: &str = "tickler";

/// Connection security for the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Security {
    /// Plain TCP.
    None,
    /// Implicit TLS.
    #[default]
    Tls,
    /// STARTTLS upgrade.
    StartTls,
}

impl From<Security> for tickler_smtp::Security {
    fn from(value: Security) -> Self {
        match value {
            Security::None => Self::None,
            Security::Tls => Self::Tls,
            Security::StartTls => Self::StartTls,
        }
    }
}

/// Outbound relay settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    /// Relay host name.
    pub host: String,
    /// Relay port; 0 picks the default for `security`.
    pub port: u16,
    /// Connection security.
    pub security: Security,
    /// Login name; empty disables AUTH.
    pub username: String,
    /// Password or app password.
    pub password: String,
    /// Envelope and `From` address; falls back to `username`.
    pub from_address: String,
    /// Display name for the `From` header.
    pub from_name: Option<String>,
    /// Name sent with EHLO.
    pub hello_name: String,
    /// Upper bound for one whole delivery attempt.
    pub timeout_secs: u64,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".into(),
            port: 0,
            security: Security::Tls,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            from_name: None,
            hello_name: "localhost".into(),
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .field("hello_name", &self.hello_name)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl SmtpSettings {
    /// Port to connect to.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            tickler_smtp::Security::from(self.security).default_port()
        } else {
            self.port
        }
    }

    /// Delivery attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Credentials for AUTH, if a username is configured.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        if self.username.is_empty() {
            return None;
        }
        Some(Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }

    /// Sender mailbox for the envelope and `From` header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if neither `from_address` nor `username`
    /// is a valid address.
    pub fn sender(&self) -> Result<Mailbox> {
        let raw = if self.from_address.trim().is_empty() {
            &self.username
        } else {
            &self.from_address
        };
        let address = Address::new(raw.as_str())
            .map_err(|e| Error::Config(format!("smtp.from_address: {e}")))?;
        Ok(match &self.from_name {
            Some(name) => Mailbox::with_name(name.clone(), address),
            None => Mailbox::new(address),
        })
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `SQLite` database file.
    pub database_path: PathBuf,
    /// Seconds between dispatch scans.
    pub scan_interval_secs: u64,
    /// Outbound relay.
    pub smtp: SmtpSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scan_interval_secs: 60,
            smtp: SmtpSettings::default(),
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    /// Loads configuration from `path`, or from [`Config::default_path`] when
    /// it exists, applies environment overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be read, the JSON
    /// is malformed, an override cannot be parsed, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parses configuration JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serde`] if the JSON is malformed.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Applies `TICKLER_*` overrides, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a numeric variable does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("TICKLER_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup("TICKLER_SCAN_INTERVAL_SECS") {
            self.scan_interval_secs = parse_number("TICKLER_SCAN_INTERVAL_SECS", &secs)?;
        }
        if let Some(host) = lookup("TICKLER_SMTP_HOST") {
            self.smtp.host = host;
        }
        if let Some(port) = lookup("TICKLER_SMTP_PORT") {
            self.smtp.port = parse_number("TICKLER_SMTP_PORT", &port)?;
        }
        if let Some(username) = lookup("TICKLER_SMTP_USERNAME") {
            self.smtp.username = username;
        }
        if let Some(password) = lookup("TICKLER_SMTP_PASSWORD") {
            self.smtp.password = password;
        }
        if let Some(from) = lookup("TICKLER_SMTP_FROM") {
            self.smtp.from_address = from;
        }
        Ok(())
    }

    /// Checks the settings needed to run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            return Err(Error::Config("scan_interval_secs must be positive".into()));
        }
        if self.smtp.timeout_secs == 0 {
            return Err(Error::Config("smtp.timeout_secs must be positive".into()));
        }
        if self.smtp.host.trim().is_empty() {
            return Err(Error::Config("smtp.host cannot be empty".into()));
        }
        if !(self.smtp.from_address.is_empty() && self.smtp.username.is_empty()) {
            self.smtp.sender()?;
        }
        Ok(())
    }

    /// Interval between scans.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("tickler.db"),
        |dir| dir.join(APP_DIR).join("tickler.db"),
    )
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: {value:?} is not a valid number")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_fields_take_defaults() {
        let config = Config::from_json(r#"{ "smtp": { "username": "avisos@example.com" } }"#).unwrap();
        assert_eq!(config.scan_interval_secs, 60);
        assert_eq!(config.smtp.host, "smtp.gmail.com");
        assert_eq!(config.smtp.effective_port(), 465);
        assert_eq!(config.smtp.timeout(), Duration::from_secs(30));
        assert_eq!(config.smtp.username, "avisos@example.com");
    }

    #[test]
    fn omitted_port_follows_security_mode() {
        let starttls =
            Config::from_json(r#"{"smtp":{"host":"relay.example.com","security":"StartTls"}}"#)
                .unwrap();
        assert_eq!(starttls.smtp.port, 0);
        assert_eq!(starttls.smtp.effective_port(), 587);

        let plain =
            Config::from_json(r#"{"smtp":{"host":"relay.example.com","security":"None"}}"#)
                .unwrap();
        assert_eq!(plain.smtp.effective_port(), 25);

        let explicit = Config::from_json(
            r#"{"smtp":{"host":"relay.example.com","security":"StartTls","port":2587}}"#,
        )
        .unwrap();
        assert_eq!(explicit.smtp.effective_port(), 2587);
    }

    #[test]
    fn full_file_parses() {
        let config = Config::from_json(
            r#"{
                "database_path": "/var/lib/tickler/tickler.db",
                "scan_interval_secs": 120,
                "smtp": {
                    "host": "relay.example.com", "port": 0, "security": "StartTls",
                    "username": "u", "password": "p",
                    "from_address": "avisos@example.com", "from_name": "Recordatorios",
                    "hello_name": "tickler.example.com", "timeout_secs": 10
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/tickler/tickler.db"));
        assert_eq!(config.scan_interval(), Duration::from_secs(120));
        assert_eq!(config.smtp.security, Security::StartTls);
        assert_eq!(config.smtp.effective_port(), 587);
        config.validate().unwrap();

        let sender = config.smtp.sender().unwrap();
        assert_eq!(sender.address.as_str(), "avisos@example.com");
        assert_eq!(sender.name.as_deref(), Some("Recordatorios"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(Config::from_json("{ nope"), Err(Error::Serde(_))));
    }

    #[test]
    fn environment_overrides_file_values() {
        let vars: HashMap<&str, &str> = [
            ("TICKLER_DATABASE", "/tmp/t.db"),
            ("TICKLER_SCAN_INTERVAL_SECS", "5"),
            ("TICKLER_SMTP_HOST", "localhost"),
            ("TICKLER_SMTP_PORT", "2525"),
            ("TICKLER_SMTP_PASSWORD", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/t.db"));
        assert_eq!(config.scan_interval_secs, 5);
        assert_eq!(config.smtp.host, "localhost");
        assert_eq!(config.smtp.effective_port(), 2525);
        assert_eq!(config.smtp.password, "secret");
    }

    #[test]
    fn unparsable_override_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "TICKLER_SMTP_PORT").then(|| "smtp".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("TICKLER_SMTP_PORT")));
    }

    #[test]
    fn validation_rejects_zero_interval_and_bad_sender() {
        let mut config = Config::default();
        config.validate().unwrap();

        config.scan_interval_secs = 0;
        assert!(config.validate().is_err());

        config.scan_interval_secs = 60;
        config.smtp.from_address = "not an address".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn sender_falls_back_to_username() {
        let settings = SmtpSettings {
            username: "avisos@example.com".into(),
            ..SmtpSettings::default()
        };
        assert_eq!(settings.sender().unwrap().address.as_str(), "avisos@example.com");
        assert!(settings.credentials().is_some());
        assert!(SmtpSettings::default().credentials().is_none());
    }

    #[test]
    fn debug_output_hides_password() {
        let settings = SmtpSettings {
            password: "hunter2".into(),
            ..SmtpSettings::default()
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
