use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [billing]
//                    platform_share_percent = 30
//
//   env var:         CONSULT_BILLING__PLATFORM_SHARE_PERCENT=30
//                    (double underscore = nesting)
//
//   CLI flags override both for host/port.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub billing: BillingFileConfig,
}

/// Server bind settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Per-connection outbound channel capacity. Delivery to a slow
    /// consumer is best-effort: a full buffer drops the message.
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            send_channel_capacity: default_send_channel_capacity(),
        }
    }
}

/// Session timing knobs (lives under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// A session with no inbound activity for this long is force-ended.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    /// Safety-net sweep that re-checks every active session's last activity.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Billing knobs (lives under `[billing]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BillingFileConfig {
    /// Platform's share of each settlement, in whole percent.
    /// The counselor fee is always the exact remainder.
    #[serde(default = "default_platform_share_percent")]
    pub platform_share_percent: i64,
}

impl Default for BillingFileConfig {
    fn default() -> Self {
        Self {
            platform_share_percent: default_platform_share_percent(),
        }
    }
}

fn default_send_channel_capacity() -> usize {
    256
}

fn default_inactivity_timeout_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_platform_share_percent() -> i64 {
    30
}

/// Load the figment stack: defaults < config.toml < CONSULT_* env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CONSULT_").split("__"))
}

// =============================================================================
// Resolved runtime config
// =============================================================================

/// Runtime knobs consumed by the hub, resolved from [`FileConfig`].
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub inactivity_timeout: Duration,
    pub sweep_interval: Duration,
    pub platform_share_percent: i64,
    pub send_channel_capacity: usize,
}

impl HubConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(fc.session.inactivity_timeout_secs),
            sweep_interval: Duration::from_secs(fc.session.sweep_interval_secs),
            // Clamp so the counselor remainder can never go negative.
            platform_share_percent: fc.billing.platform_share_percent.clamp(0, 100),
            send_channel_capacity: fc.server.send_channel_capacity.max(1),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

/// Directory layout config (derived from --data-dir, not tunable via figment).
#[derive(Clone, Debug)]
pub struct ConsultHubConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl ConsultHubConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".consult_hub"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("consult_hub.db");
        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}

/// Resolve the bind address from config + CLI overrides.
pub fn resolve_bind_addr(
    fc: &FileConfig,
    cli_host: Option<&str>,
    cli_port: Option<u16>,
) -> Result<SocketAddr> {
    let host = cli_host
        .map(str::to_string)
        .or_else(|| fc.server.host.clone())
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = cli_port.or(fc.server.port).unwrap_or(8082);
    format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", host, port))
}
