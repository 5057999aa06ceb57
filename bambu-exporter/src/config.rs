//! Exporter configuration.
//!
//! Layers, last one wins: built-in defaults, an optional YAML file
//! (`BAMBU_EXPORTER_CONFIG`, default `exporter.yaml`), then environment
//! variables (a `.env` file is loaded into the environment by `main`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub mqtt: MqttConf,
    pub scrape: ScrapeConf,
    pub http: HttpConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Report topic, `device/<serial>/report` on Bambu printers.
    pub topic: String,
    pub tls: bool,
    pub client_id_prefix: String,
    pub pushall: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConf {
    pub grace_ms: u64,
    pub connect_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    pub scrape_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub listen: String,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8883,
            username: "bblp".into(),
            password: String::new(),
            topic: String::new(),
            tls: true,
            client_id_prefix: "bambu-exporter".into(),
            pushall: true,
        }
    }
}

impl Default for ScrapeConf {
    fn default() -> Self {
        Self {
            grace_ms: 1000,
            connect_timeout_ms: 3000,
            disconnect_timeout_ms: 250,
            scrape_timeout_ms: 10_000,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9101".into(),
        }
    }
}

impl MqttConf {
    pub fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ScrapeConf {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout_ms)
    }

    /// Longest a healthy scrape can take: the connack and suback waits
    /// both use the connect timeout.
    pub fn worst_case(&self) -> Duration {
        self.connect_timeout() * 2 + self.grace() + self.disconnect_timeout()
    }

    pub fn fits_deadline(&self) -> bool {
        self.worst_case() < self.scrape_timeout()
    }
}

impl HttpConf {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen.parse().map_err(|_| ConfigError::Invalid {
            key: "BAMBU_EXPORTER_LISTEN",
            value: self.listen.clone(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub async fn load_config() -> Result<ExporterConfig, ConfigError> {
    let path = std::env::var("BAMBU_EXPORTER_CONFIG").unwrap_or_else(|_| "exporter.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
        info!(%path, "loaded config file");
        parse_yaml(&txt)?
    } else {
        ExporterConfig::default()
    };

    apply_env(&mut cfg, |key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn parse_yaml(txt: &str) -> Result<ExporterConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(ExporterConfig::default());
    }
    Ok(serde_yaml::from_str(txt)?)
}

/// Overrides `cfg` with every variable `lookup` knows about.
pub fn apply_env<F>(cfg: &mut ExporterConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("BAMBU_PRINTER_IP") {
        cfg.mqtt.host = v;
    }
    if let Some(v) = get("BAMBU_PRINTER_PORT") {
        cfg.mqtt.port = parse("BAMBU_PRINTER_PORT", &v)?;
    }
    if let Some(v) = get("USERNAME") {
        cfg.mqtt.username = v;
    }
    if let Some(v) = get("PASSWORD") {
        cfg.mqtt.password = v;
    }
    if let Some(v) = get("MQTT_TOPIC") {
        cfg.mqtt.topic = v;
    }
    if let Some(v) = get("BAMBU_TLS") {
        cfg.mqtt.tls = parse_bool("BAMBU_TLS", &v)?;
    }
    if let Some(v) = get("BAMBU_CLIENT_ID_PREFIX") {
        cfg.mqtt.client_id_prefix = v;
    }
    if let Some(v) = get("BAMBU_PUSHALL") {
        cfg.mqtt.pushall = parse_bool("BAMBU_PUSHALL", &v)?;
    }
    if let Some(v) = get("BAMBU_EXPORTER_LISTEN") {
        cfg.http.listen = v;
    }
    if let Some(v) = get("BAMBU_GRACE_MS") {
        cfg.scrape.grace_ms = parse("BAMBU_GRACE_MS", &v)?;
    }
    if let Some(v) = get("BAMBU_CONNECT_TIMEOUT_MS") {
        cfg.scrape.connect_timeout_ms = parse("BAMBU_CONNECT_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("BAMBU_DISCONNECT_TIMEOUT_MS") {
        cfg.scrape.disconnect_timeout_ms = parse("BAMBU_DISCONNECT_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("BAMBU_SCRAPE_TIMEOUT_MS") {
        cfg.scrape.scrape_timeout_ms = parse("BAMBU_SCRAPE_TIMEOUT_MS", &v)?;
    }
    Ok(())
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.is_empty() {
            return Err(ConfigError::Missing("BAMBU_PRINTER_IP"));
        }
        if self.mqtt.password.is_empty() {
            return Err(ConfigError::Missing("PASSWORD"));
        }
        if self.mqtt.topic.is_empty() || self.mqtt.topic.contains('<') {
            // `device/<>/report` is the placeholder shipped in example .env files
            return Err(ConfigError::Missing("MQTT_TOPIC"));
        }
        self.http.socket_addr()?;
        if !self.scrape.fits_deadline() {
            warn!(
                grace_ms = self.scrape.grace_ms,
                connect_timeout_ms = self.scrape.connect_timeout_ms,
                disconnect_timeout_ms = self.scrape.disconnect_timeout_ms,
                scrape_timeout_ms = self.scrape.scrape_timeout_ms,
                "scrape timeouts add up past the scrape deadline, slow scrapes will be cut short"
            );
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("BAMBU_PRINTER_IP", "192.168.1.50"),
            ("PASSWORD", "12345678"),
            ("MQTT_TOPIC", "device/01S00C123456789/report"),
        ]
    }

    #[test]
    fn test_defaults() {
        let cfg = ExporterConfig::default();
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.mqtt.username, "bblp");
        assert!(cfg.mqtt.tls);
        assert_eq!(cfg.scrape.grace(), Duration::from_secs(1));
        assert_eq!(cfg.http.listen, "0.0.0.0:9101");
        assert!(cfg.scrape.fits_deadline());
    }

    #[test]
    fn test_worst_case_scrape_time() {
        let mut scrape = ScrapeConf::default();
        assert_eq!(scrape.worst_case(), Duration::from_millis(7250));

        scrape.connect_timeout_ms = 5000;
        assert_eq!(scrape.worst_case(), Duration::from_millis(11_250));
        assert!(!scrape.fits_deadline());

        scrape.scrape_timeout_ms = 12_000;
        assert!(scrape.fits_deadline());
    }

    #[test]
    fn test_env_overrides() {
        let mut pairs = required();
        pairs.extend([
            ("BAMBU_PRINTER_PORT", "1883"),
            ("BAMBU_TLS", "false"),
            ("BAMBU_GRACE_MS", "250"),
            ("USERNAME", "operator"),
        ]);
        let mut cfg = ExporterConfig::default();
        apply_env(&mut cfg, env(&pairs)).unwrap();
        cfg.validate().unwrap();

        assert_eq!(cfg.mqtt.broker(), "192.168.1.50:1883");
        assert!(!cfg.mqtt.tls);
        assert_eq!(cfg.scrape.grace(), Duration::from_millis(250));
        assert_eq!(cfg.mqtt.username, "operator");
    }

    #[test]
    fn test_missing_required_values() {
        let mut cfg = ExporterConfig::default();
        apply_env(&mut cfg, env(&[("BAMBU_PRINTER_IP", "10.0.0.2")])).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing("PASSWORD"))));
    }

    #[test]
    fn test_placeholder_topic_rejected() {
        let mut pairs = required();
        pairs.push(("MQTT_TOPIC", "device/<>/report"));
        let mut cfg = ExporterConfig::default();
        apply_env(&mut cfg, env(&pairs)).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing("MQTT_TOPIC"))));
    }

    #[test]
    fn test_invalid_number() {
        let mut cfg = ExporterConfig::default();
        let err = apply_env(&mut cfg, env(&[("BAMBU_GRACE_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BAMBU_GRACE_MS", .. }));
    }

    #[test]
    fn test_yaml_then_env() {
        let mut cfg = parse_yaml(
            "mqtt:\n  host: printer.lan\n  topic: device/ABC/report\n  password: secret\nscrape:\n  grace_ms: 1500\n",
        )
        .unwrap();
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.scrape.grace_ms, 1500);

        apply_env(&mut cfg, env(&[("BAMBU_GRACE_MS", "500")])).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.scrape.grace_ms, 500);
        assert_eq!(cfg.mqtt.host, "printer.lan");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let cfg = parse_yaml("  \n").unwrap();
        assert_eq!(cfg.scrape.scrape_timeout_ms, 10_000);
    }
}
