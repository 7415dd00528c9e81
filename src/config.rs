use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root namespace segment: every key lives under `/<organization>/`.
    pub organization: String,
    /// Events the in-process store keeps for watches that resume from an index.
    pub history_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            organization: "defaultorg".to_string(),
            history_size: crate::store::DEFAULT_HISTORY_SIZE,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `catalog` config file
    /// and `CATALOG_`-prefixed environment variables, in that order
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("catalog").required(false));

        // e.g. CATALOG_SERVER__PORT=9090, CATALOG_STORE__ORGANIZATION=acme
        config = config.add_source(
            config::Environment::with_prefix("CATALOG")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;

        Ok(app_config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        crate::model::validate_name(&self.store.organization)
            .map_err(|e| anyhow::anyhow!("invalid store.organization: {}", e))?;
        if self.watch.timeout_secs == 0 {
            anyhow::bail!("watch.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch.timeout_secs)
    }
}
