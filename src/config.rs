use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::protocol::Protocol;
use crate::reconcile::{ReconcileSettings, ZoneDefaults};
use crate::types::ServerIdentity;

/// A game server the daemon manages.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Key the zone store files this server's records under.
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity::new(self.host.clone(), self.port, self.password.clone())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    pub list_command: String,
    pub zone_prefix: String,
    /// Run one pass for every server at startup.
    pub on_start: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    pub refuse_empty_snapshot: bool,
    pub defaults: ZoneDefaults,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        let settings = ReconcileSettings::default();
        Self {
            list_command: settings.list_command,
            zone_prefix: settings.zone_prefix,
            on_start: false,
            interval_secs: None,
            refuse_empty_snapshot: settings.refuse_empty_snapshot,
            defaults: settings.defaults,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
    pub protocol: Protocol,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub store_path: PathBuf,
    pub reconcile: ReconcileConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            protocol: Protocol::WebRcon,
            connect_timeout_ms: 5_000,
            command_timeout_ms: 10_000,
            idle_timeout_secs: 300,
            sweep_interval_secs: 60,
            store_path: "zones.json".into(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("rcon.toml"))
            .merge(Json::file("rcon.json"))
            .merge(Env::prefixed("RCON_").split("__"));
        let mut config = Self::from_figment(figment)?;

        // Single-server setups can take the password as a Docker-style secret.
        if let Ok(secret_file) = std::env::var("RCON_PASSWORD_FILE") {
            if let [server] = config.servers.as_mut_slice() {
                server.password_file = Some(secret_file.into());
            }
        }

        config.read_secrets()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    fn read_secrets(&mut self) -> anyhow::Result<()> {
        for server in &mut self.servers {
            if let Some(ref file) = server.password_file {
                server.password = std::fs::read_to_string(file)
                    .map_err(|e| {
                        anyhow::anyhow!("Cannot read password file {}: {}", file.display(), e)
                    })?
                    .trim()
                    .to_string();
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.id.is_empty() {
                anyhow::bail!("Server {}:{} has an empty id", server.host, server.port);
            }
            if !seen.insert(server.id.as_str()) {
                anyhow::bail!("Duplicate server id {:?}", server.id);
            }
        }
        if self.connect_timeout_ms == 0 || self.command_timeout_ms == 0 {
            anyhow::bail!("Timeouts must be greater than zero");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be greater than zero");
        }
        if self.reconcile.zone_prefix.is_empty() {
            anyhow::bail!("reconcile.zone_prefix must not be empty");
        }
        if self.reconcile.interval_secs == Some(0) {
            anyhow::bail!("reconcile.interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            list_command: self.reconcile.list_command.clone(),
            zone_prefix: self.reconcile.zone_prefix.clone(),
            timeout: self.command_timeout(),
            refuse_empty_snapshot: self.reconcile.refuse_empty_snapshot,
            defaults: self.reconcile.defaults.clone(),
        }
    }
}
