//! Daemon configuration
//!
//! Loaded once at startup from a TOML file; see
//! [`ntsv_common::config::resolve_config_path`] for the discovery order.
//! Command-line flags override the file, the file overrides the compiled
//! defaults below. Nothing here can change while the daemon runs except the
//! `[profile]` table, which is copied into the profile store and updated
//! through the control surface.
//!
//! ```toml
//! port = 5790
//! contention = "queue"
//!
//! [logging]
//! level = "debug"
//!
//! [policy.system]
//! mode = "passive"
//! allowed = true
//!
//! [profile]
//! silent = false
//! tones.Ringtone = "/home/user/MyDocs/ring.mp3"
//! ```

use crate::error::{Error, Result};
use crate::facade::ProfileSettings;
use crate::notification::ContentionMode;
use crate::policy::{ClassMode, ClassSettings};
use crate::runtime::DaemonSettings;
use ntsv_common::config::{default_data_dir, load_toml, resolve_config_path};
use ntsv_common::PolicyClass;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "NTSV_CONFIG";

const APP_NAME: &str = "ntsv";

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// HTTP control surface address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Tones under this directory are played without transcoding
    #[serde(default = "default_system_sounds_dir")]
    pub system_sounds_dir: PathBuf,

    /// Where decoded copies of user tones are written
    #[serde(default = "default_decode_dir")]
    pub decode_dir: PathBuf,

    #[serde(default)]
    pub contention: ContentionMode,

    #[serde(default = "default_startup_sync_timeout_secs")]
    pub startup_sync_timeout_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-class arbitration, keyed by policy class name
    #[serde(default)]
    pub policy: BTreeMap<String, PolicyClassConfig>,

    #[serde(default)]
    pub profile: ProfileSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also append log records to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// `[policy.<class>]` table
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyClassConfig {
    /// Overrides the class's built-in mode
    #[serde(default)]
    pub mode: Option<ClassMode>,

    /// Initial "allowed" hint of a passive class
    #[serde(default)]
    pub allowed: Option<bool>,

    /// Answer given by the in-process policy authority
    #[serde(default = "default_auto_grant")]
    pub auto_grant: bool,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5790
}

fn default_system_sounds_dir() -> PathBuf {
    PathBuf::from("/usr/share/sounds")
}

fn default_decode_dir() -> PathBuf {
    default_data_dir(APP_NAME).join("sounds")
}

fn default_startup_sync_timeout_secs() -> u64 {
    90
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_auto_grant() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            system_sounds_dir: default_system_sounds_dir(),
            decode_dir: default_decode_dir(),
            contention: ContentionMode::default(),
            startup_sync_timeout_secs: default_startup_sync_timeout_secs(),
            logging: LoggingConfig::default(),
            policy: BTreeMap::new(),
            profile: ProfileSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Locate and parse the config file, falling back to defaults
    ///
    /// # Errors
    /// - `Common(Config)` when an explicitly named file is missing or malformed
    /// - `Config` when a policy class or profile category key is unknown
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let config = match resolve_config_path(cli_path, CONFIG_ENV_VAR, APP_NAME)? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                load_toml::<DaemonConfig>(&path)?
            }
            None => {
                info!("No configuration file found, using defaults");
                DaemonConfig::default()
            }
        };
        config.validated()
    }

    /// Parse a config from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: DaemonConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validated()
    }

    fn validated(mut self) -> Result<Self> {
        for key in self.policy.keys() {
            parse_class(key)?;
        }
        self.profile = self
            .profile
            .normalized()
            .map_err(|e| Error::Config(format!("[profile]: {}", e)))?;
        Ok(self)
    }

    /// Arbitration settings per class; classes without a table use their defaults
    pub fn class_settings(&self) -> Result<HashMap<PolicyClass, ClassSettings>> {
        self.policy
            .iter()
            .map(|(key, cfg)| {
                let class = parse_class(key)?;
                let default = ClassSettings::default_for(class);
                Ok((
                    class,
                    ClassSettings {
                        mode: cfg.mode.unwrap_or(default.mode),
                        allowed: cfg.allowed.unwrap_or(default.allowed),
                    },
                ))
            })
            .collect()
    }

    /// Grant decisions for the in-process policy authority
    pub fn auto_grant(&self) -> Result<HashMap<PolicyClass, bool>> {
        let mut grants: HashMap<PolicyClass, bool> = PolicyClass::ALL
            .iter()
            .map(|class| (*class, default_auto_grant()))
            .collect();
        for (key, cfg) in &self.policy {
            grants.insert(parse_class(key)?, cfg.auto_grant);
        }
        Ok(grants)
    }

    pub fn daemon_settings(&self) -> Result<DaemonSettings> {
        Ok(DaemonSettings {
            contention: self.contention,
            policy: self.class_settings()?,
            system_sounds_dir: self.system_sounds_dir.clone(),
            startup_sync_timeout: Duration::from_secs(self.startup_sync_timeout_secs),
        })
    }

    /// `RUST_LOG`-style directive used when the environment sets none
    pub fn log_filter(&self) -> String {
        let level = &self.logging.level;
        format!(
            "ntsv_daemon={},ntsv_common={},tower_http={}",
            level, level, level
        )
    }
}

fn parse_class(key: &str) -> Result<PolicyClass> {
    key.parse()
        .map_err(|e| Error::Config(format!("[policy.{}]: {}", key, e)))
}
