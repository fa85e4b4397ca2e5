use crate::domain::connection::TransportKind;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DashboardConfig {
    pub server: ServerSettings,
    pub transport: TransportSettings,
    pub router: RouterSettings,
    pub buffer: BufferSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8090".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportSettings {
    pub default: TransportKind,
    pub retry_delay_ms: u64,
    pub socket: SocketSettings,
    pub broker: BrokerSettings,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            default: TransportKind::Socket,
            retry_delay_ms: 1500,
            socket: SocketSettings::default(),
            broker: BrokerSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SocketSettings {
    pub endpoint: String,
    pub port: u16,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            endpoint: "localhost".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerSettings {
    pub endpoint: String,
    pub port: u16,
    pub topic: String,
    pub client_id: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            endpoint: "broker.hivemq.com".to_string(),
            port: 1883,
            topic: "gc/data".to_string(),
            client_id: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RouterSettings {
    pub reset_marker: String,
    pub save_marker: String,
    pub phase_end_marker: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            reset_marker: "reset".to_string(),
            save_marker: "save".to_string(),
            phase_end_marker: "end".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BufferSettings {
    pub max_points: usize,
    pub strict_phases: bool,
    pub palette: Vec<String>,
    pub phases: Vec<PhaseSettings>,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_points: 50,
            strict_phases: false,
            palette: ["#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            phases: (1..=3)
                .map(|i| PhaseSettings {
                    key: format!("phase{}", i),
                    label: format!("Phase {}", i),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PhaseSettings {
    pub key: String,
    pub label: String,
}

/// Resolved parameters for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub endpoint: String,
    pub port: u16,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub client_id: String,
}

impl TransportConfig {
    pub fn socket_url(&self) -> String {
        format!("ws://{}:{}", self.endpoint, self.port)
    }
}

/// Per-request overrides on top of the configured defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportOverrides {
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub topic: Option<String>,
    pub client_id: Option<String>,
}

impl TransportSettings {
    pub fn resolve(&self, kind: TransportKind) -> TransportConfig {
        self.resolve_with(kind, &TransportOverrides::default())
    }

    /// Build the config for `kind`, letting non-empty overrides win.
    /// Broker sessions get a generated client id when none is given.
    pub fn resolve_with(
        &self,
        kind: TransportKind,
        overrides: &TransportOverrides,
    ) -> TransportConfig {
        fn pick(value: &Option<String>, fallback: &str) -> String {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .to_string()
        }

        match kind {
            TransportKind::Socket => TransportConfig {
                kind,
                endpoint: pick(&overrides.endpoint, &self.socket.endpoint),
                port: overrides.port.unwrap_or(self.socket.port),
                topic: String::new(),
                client_id: String::new(),
            },
            TransportKind::Broker => {
                let configured_id = self.broker.client_id.clone().unwrap_or_default();
                let mut client_id = pick(&overrides.client_id, &configured_id);
                if client_id.is_empty() {
                    client_id = generate_client_id();
                }
                TransportConfig {
                    kind,
                    endpoint: pick(&overrides.endpoint, &self.broker.endpoint),
                    port: overrides.port.unwrap_or(self.broker.port),
                    topic: pick(&overrides.topic, &self.broker.topic),
                    client_id,
                }
            }
        }
    }
}

/// `gc_` followed by nine lowercase hex digits
pub fn generate_client_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();
    format!("gc_{}", suffix)
}

pub fn load_dashboard_config() -> anyhow::Result<DashboardConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/dashboard").required(false))
        .add_source(
            config::Environment::with_prefix("RIG_DASHBOARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_client_id() {
        let id = generate_client_id();
        assert!(id.starts_with("gc_"));
        assert_eq!(id.len(), 12);
        assert!(id[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_resolve_socket_defaults() {
        let settings = TransportSettings::default();
        let config = settings.resolve(TransportKind::Socket);
        assert_eq!(config.socket_url(), "ws://localhost:8080");
        assert!(config.topic.is_empty());
    }

    #[test]
    fn test_resolve_broker_overrides_and_client_id() {
        let settings = TransportSettings::default();
        let overrides = TransportOverrides {
            endpoint: Some("test.mosquitto.org".to_string()),
            port: Some(1884),
            topic: Some("  ".to_string()),
            client_id: None,
        };
        let config = settings.resolve_with(TransportKind::Broker, &overrides);
        assert_eq!(config.endpoint, "test.mosquitto.org");
        assert_eq!(config.port, 1884);
        assert_eq!(config.topic, "gc/data");
        assert!(config.client_id.starts_with("gc_"));
    }

    #[test]
    fn test_configured_client_id_is_kept() {
        let mut settings = TransportSettings::default();
        settings.broker.client_id = Some("rig-7".to_string());
        let config = settings.resolve(TransportKind::Broker);
        assert_eq!(config.client_id, "rig-7");
    }

    #[test]
    fn test_buffer_defaults() {
        let buffer = BufferSettings::default();
        assert_eq!(buffer.max_points, 50);
        let keys: Vec<&str> = buffer.phases.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["phase1", "phase2", "phase3"]);
    }
}
