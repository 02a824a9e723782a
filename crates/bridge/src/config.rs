//! TOML config file loading and validation, plus the credentials that must
//! come from the environment.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::schedule::DEFAULT_SCHEDULE_ANCHOR;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub advisor: AdvisorConfig,
    pub schedule: ScheduleConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Topics are `<base_topic>/<device_id>/<property>`.
    pub base_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            keep_alive_secs: 30,
            base_topic: "plantcare".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Epoch seconds published as the schedule's `frm`.
    pub anchor_epoch: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            anchor_epoch: DEFAULT_SCHEDULE_ANCHOR,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_mqtt(&mut errors);
        self.validate_advisor(&mut errors);

        if self.schedule.anchor_epoch < 0 {
            errors.push(format!(
                "schedule: anchor_epoch must not be negative, got {}",
                self.schedule.anchor_epoch
            ));
        }
        if self.web.enabled && self.web.port == 0 {
            errors.push("web: port must be non-zero when enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;

        if m.host.trim().is_empty() {
            errors.push("mqtt: host is empty".to_string());
        }
        if m.port == 0 {
            errors.push("mqtt: port must be non-zero".to_string());
        }
        if m.keep_alive_secs == 0 {
            errors.push("mqtt: keep_alive_secs must be positive".to_string());
        }

        let base = m.base_topic.trim();
        if base.is_empty() {
            errors.push("mqtt: base_topic is empty".to_string());
        } else if base.contains(['+', '#']) {
            errors.push(format!(
                "mqtt: base_topic '{base}' must not contain wildcards"
            ));
        } else if base.starts_with('/') || base.ends_with('/') {
            errors.push(format!(
                "mqtt: base_topic '{base}' must not start or end with '/'"
            ));
        }
    }

    fn validate_advisor(&self, errors: &mut Vec<String>) {
        let a = &self.advisor;

        if !(a.base_url.starts_with("http://") || a.base_url.starts_with("https://")) {
            errors.push(format!(
                "advisor: base_url '{}' must be an http(s) URL",
                a.base_url
            ));
        }
        if a.model.trim().is_empty() {
            errors.push("advisor: model is empty".to_string());
        }
        if a.timeout_secs == 0 {
            errors.push("advisor: timeout_secs must be positive".to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file means
/// defaults.
pub fn load(path: &str) -> Result<Config> {
    let config = match std::fs::read_to_string(path) {
        Ok(contents) => {
            toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path, "no config file, using defaults");
            Config::default()
        }
        Err(e) => return Err(e).with_context(|| format!("failed to read config: {path}")),
    };
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

pub const DEVICE_ID_VAR: &str = "DEVICE_ID";
pub const SECRET_KEY_VAR: &str = "SECRET_KEY";
pub const API_KEY_VAR: &str = "API_KEY";

/// Secrets for the cloud channel and the advisory service.
#[derive(Clone)]
pub struct Credentials {
    pub device_id: String,
    pub secret_key: String,
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// All three variables are required; the error names every one missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut missing: Vec<&str> = Vec::new();
        let mut take = |name: &'static str| match lookup(name) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                missing.push(name);
                String::new()
            }
        };

        let device_id = take(DEVICE_ID_VAR);
        let secret_key = take(SECRET_KEY_VAR);
        let api_key = take(API_KEY_VAR);

        if !missing.is_empty() {
            bail!("missing required environment: {}", missing.join(", "));
        }
        if device_id.contains(['/', '+', '#']) {
            bail!("{DEVICE_ID_VAR} '{device_id}' must not contain '/', '+' or '#'");
        }

        Ok(Self {
            device_id,
            secret_key,
            api_key,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[mqtt]
host = "broker.local"
port = 8883
keep_alive_secs = 60
base_topic = "greenhouse"

[advisor]
base_url = "http://localhost:11434/v1"
model = "llama3"
timeout_secs = 90

[schedule]
anchor_epoch = 1700000000

[web]
enabled = false
port = 9000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.base_topic, "greenhouse");
        assert_eq!(config.advisor.model, "llama3");
        assert_eq!(config.advisor.timeout_secs, 90);
        assert_eq!(config.schedule.anchor_epoch, 1_700_000_000);
        assert!(!config.web.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.mqtt.host, "127.0.0.1");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.base_topic, "plantcare");
        assert_eq!(config.schedule.anchor_epoch, DEFAULT_SCHEDULE_ANCHOR);
        assert!(config.web.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str("[mqtt]\nport = 1884\n").unwrap();
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.mqtt.host, "127.0.0.1");
        assert_eq!(config.mqtt.keep_alive_secs, 30);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let config = load("/nonexistent/bridge.toml").unwrap();
        assert_eq!(config.mqtt.port, 1883);
    }

    // -- Validation --------------------------------------------------------

    #[test]
    fn mqtt_empty_host_rejected() {
        let mut cfg = Config::default();
        cfg.mqtt.host = "  ".into();
        assert_validation_err(&cfg, "host is empty");
    }

    #[test]
    fn mqtt_zero_port_rejected() {
        let mut cfg = Config::default();
        cfg.mqtt.port = 0;
        assert_validation_err(&cfg, "port must be non-zero");
    }

    #[test]
    fn mqtt_zero_keep_alive_rejected() {
        let mut cfg = Config::default();
        cfg.mqtt.keep_alive_secs = 0;
        assert_validation_err(&cfg, "keep_alive_secs");
    }

    #[test]
    fn mqtt_wildcard_base_topic_rejected() {
        let mut cfg = Config::default();
        cfg.mqtt.base_topic = "plants/#".into();
        assert_validation_err(&cfg, "wildcards");
    }

    #[test]
    fn mqtt_slash_edges_rejected() {
        let mut cfg = Config::default();
        cfg.mqtt.base_topic = "/plants".into();
        assert_validation_err(&cfg, "start or end");
    }

    #[test]
    fn advisor_bad_url_rejected() {
        let mut cfg = Config::default();
        cfg.advisor.base_url = "api.openai.com".into();
        assert_validation_err(&cfg, "http(s) URL");
    }

    #[test]
    fn advisor_zero_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.advisor.timeout_secs = 0;
        assert_validation_err(&cfg, "timeout_secs");
    }

    #[test]
    fn negative_anchor_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.anchor_epoch = -1;
        assert_validation_err(&cfg, "anchor_epoch");
    }

    #[test]
    fn web_zero_port_only_rejected_when_enabled() {
        let mut cfg = Config::default();
        cfg.web.port = 0;
        assert_validation_err(&cfg, "web: port");
        cfg.web.enabled = false;
        cfg.validate().unwrap();
    }

    #[test]
    fn multiple_errors_all_reported() {
        let mut cfg = Config::default();
        cfg.mqtt.host = String::new();
        cfg.advisor.model = String::new();
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("2 errors"), "got: {msg}");
        assert!(msg.contains("host is empty"));
        assert!(msg.contains("model is empty"));
    }

    // -- Credentials ---------------------------------------------------------

    #[test]
    fn credentials_all_present() {
        let creds = Credentials::from_lookup(lookup(&[
            ("DEVICE_ID", "pot-1"),
            ("SECRET_KEY", "s3cret"),
            ("API_KEY", " sk-abc "),
        ]))
        .unwrap();
        assert_eq!(creds.device_id, "pot-1");
        assert_eq!(creds.secret_key, "s3cret");
        assert_eq!(creds.api_key, "sk-abc");
    }

    #[test]
    fn credentials_missing_are_all_named() {
        let err = Credentials::from_lookup(lookup(&[("DEVICE_ID", "pot-1"), ("API_KEY", "")]))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("SECRET_KEY"), "got: {msg}");
        assert!(msg.contains("API_KEY"), "got: {msg}");
        assert!(!msg.contains("DEVICE_ID"), "got: {msg}");
    }

    #[test]
    fn credentials_reject_topic_characters_in_device_id() {
        let err = Credentials::from_lookup(lookup(&[
            ("DEVICE_ID", "pot/1"),
            ("SECRET_KEY", "s"),
            ("API_KEY", "k"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DEVICE_ID"));
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials {
            device_id: "pot-1".into(),
            secret_key: "s3cret".into(),
            api_key: "sk-abc".into(),
        };
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("pot-1"));
        assert!(!dbg.contains("s3cret"));
        assert!(!dbg.contains("sk-abc"));
    }
}
