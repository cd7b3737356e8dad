use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Groups the broker connection, session timeouts, game namespace, the relay
/// server address and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub session: SessionSettings,
    pub game: GameSettings,
    pub server: ServerSettings,
    pub log: LogSettings,
}

/// Connection properties for the message broker.
///
/// `url` must be a WebSocket endpoint (`ws://` or `wss://`).
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub vpn_name: String,
    pub username: String,
    pub password: String,
    pub connect_retries: u32,
}

/// Timeouts applied by the session to correlated operations.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    pub operation_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GameSettings {
    pub namespace: String,
}

/// Configuration settings for the relay server.
///
/// Defines the host and port the relay broker will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

impl BrokerSettings {
    /// Checks the settings that can be verified without touching the network.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(format!(
                "broker url '{}' must be a WebSocket endpoint beginning with ws:// or wss://",
                self.url
            ));
        }
        Ok(())
    }
}

impl SessionSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional. Missing values are filled from
/// the defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub session: Option<PartialSessionSettings>,
    pub game: Option<PartialGameSettings>,
    pub server: Option<PartialServerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub url: Option<String>,
    pub vpn_name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSessionSettings {
    pub operation_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub disconnect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialGameSettings {
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                url: "ws://127.0.0.1:8080".to_string(),
                vpn_name: "default".to_string(),
                username: "default".to_string(),
                password: String::new(),
                connect_retries: 3,
            },
            session: SessionSettings {
                operation_timeout_ms: 1000,
                request_timeout_ms: 2000,
                disconnect_timeout_ms: 5000,
            },
            game: GameSettings {
                namespace: "entangled-cannon".to_string(),
            },
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Overlays whatever was provided on top of `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let broker = self.broker;
        let session = self.session;
        let game = self.game;
        let server = self.server;
        let log = self.log;

        Settings {
            broker: BrokerSettings {
                url: broker
                    .as_ref()
                    .and_then(|b| b.url.clone())
                    .unwrap_or(defaults.broker.url),
                vpn_name: broker
                    .as_ref()
                    .and_then(|b| b.vpn_name.clone())
                    .unwrap_or(defaults.broker.vpn_name),
                username: broker
                    .as_ref()
                    .and_then(|b| b.username.clone())
                    .unwrap_or(defaults.broker.username),
                password: broker
                    .as_ref()
                    .and_then(|b| b.password.clone())
                    .unwrap_or(defaults.broker.password),
                connect_retries: broker
                    .as_ref()
                    .and_then(|b| b.connect_retries)
                    .unwrap_or(defaults.broker.connect_retries),
            },
            session: SessionSettings {
                operation_timeout_ms: session
                    .as_ref()
                    .and_then(|s| s.operation_timeout_ms)
                    .unwrap_or(defaults.session.operation_timeout_ms),
                request_timeout_ms: session
                    .as_ref()
                    .and_then(|s| s.request_timeout_ms)
                    .unwrap_or(defaults.session.request_timeout_ms),
                disconnect_timeout_ms: session
                    .as_ref()
                    .and_then(|s| s.disconnect_timeout_ms)
                    .unwrap_or(defaults.session.disconnect_timeout_ms),
            },
            game: GameSettings {
                namespace: game
                    .and_then(|g| g.namespace)
                    .unwrap_or(defaults.game.namespace),
            },
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(defaults.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(defaults.server.port),
            },
            log: LogSettings {
                level: log.and_then(|l| l.level).unwrap_or(defaults.log.level),
            },
        }
    }
}
