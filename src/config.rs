//! Provides a means to read, merge and hold the tunables of a scanner.
//!
//! Every threshold and timeout the classifier and channels use is empirical,
//! so all of them can be overridden from `~/.netsweep.toml`.
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use log::debug;
use serde_derive::Deserialize;

use crate::address::MAX_EXPANDED_ADDRESSES;
use crate::classifier::Thresholds;
use crate::error::ScanError;
use crate::probe::ChannelKind;

/// Resolved configuration of a [`Scanner`](crate::scanner::Scanner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub timing_lower_bound_ms: u64,
    pub timing_upper_bound_ms: u64,
    pub head_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub resource_timeout_ms: u64,
    pub port_scan_timeout_ms: u64,
    /// Ceiling of the connection pool shared by all socket probes.
    pub pool_cap: usize,
    pub pool_interval_ms: u64,
    pub max_concurrent_loads: usize,
    pub load_interval_ms: u64,
    /// `host:port` of the STUN server used for address discovery.
    pub stun_server: String,
    pub discovery_timeout_ms: u64,
    pub max_expanded_addresses: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timing_lower_bound_ms: 2900,
            timing_upper_bound_ms: 10_000,
            head_timeout_ms: 20_000,
            socket_timeout_ms: 20_000,
            fetch_timeout_ms: 20_000,
            resource_timeout_ms: 20_000,
            port_scan_timeout_ms: 5000,
            pool_cap: 130,
            pool_interval_ms: 50,
            max_concurrent_loads: 5,
            load_interval_ms: 100,
            stun_server: "stun.l.google.com:19302".to_owned(),
            discovery_timeout_ms: 3000,
            max_expanded_addresses: MAX_EXPANDED_ADDRESSES,
        }
    }
}

impl ScanConfig {
    /// Defaults merged with the configuration file, if there is one.
    pub fn load(custom_config_path: Option<PathBuf>) -> Result<Self, ScanError> {
        let mut config = Self::default();
        if let Some(file) = ConfigFile::read(custom_config_path)? {
            config.merge(&file);
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides every field the file sets.
    pub fn merge(&mut self, file: &ConfigFile) {
        macro_rules! merge_set {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &file.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_set!(
            timing_lower_bound_ms,
            timing_upper_bound_ms,
            head_timeout_ms,
            socket_timeout_ms,
            fetch_timeout_ms,
            resource_timeout_ms,
            port_scan_timeout_ms,
            pool_cap,
            pool_interval_ms,
            max_concurrent_loads,
            load_interval_ms,
            stun_server,
            discovery_timeout_ms,
            max_expanded_addresses
        );
    }

    /// Rejects combinations that would stall or misclassify every scan.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.timing_lower_bound_ms > self.timing_upper_bound_ms {
            return Err(ScanError::Config(format!(
                "timing_lower_bound_ms ({}) is above timing_upper_bound_ms ({})",
                self.timing_lower_bound_ms, self.timing_upper_bound_ms
            )));
        }

        for (name, value) in [
            ("pool_cap", self.pool_cap),
            ("max_concurrent_loads", self.max_concurrent_loads),
            ("max_expanded_addresses", self.max_expanded_addresses),
        ] {
            if value == 0 {
                return Err(ScanError::Config(format!("{name} must be at least 1")));
            }
        }

        for (name, value) in [
            ("pool_interval_ms", self.pool_interval_ms),
            ("load_interval_ms", self.load_interval_ms),
        ] {
            if value == 0 {
                return Err(ScanError::Config(format!("{name} must be at least 1")));
            }
        }

        if !self.stun_server.contains(':') {
            return Err(ScanError::Config(format!(
                "stun_server '{}' must be host:port",
                self.stun_server
            )));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            lower_bound: Duration::from_millis(self.timing_lower_bound_ms),
            upper_bound: Duration::from_millis(self.timing_upper_bound_ms),
            port_scan_timeout: self.port_scan_timeout(),
        }
    }

    /// Host sweep timeout for a channel.
    pub fn timeout_for(&self, kind: ChannelKind) -> Duration {
        Duration::from_millis(match kind {
            ChannelKind::Head => self.head_timeout_ms,
            ChannelKind::Socket => self.socket_timeout_ms,
            ChannelKind::Fetch => self.fetch_timeout_ms,
            ChannelKind::Resource => self.resource_timeout_ms,
        })
    }

    pub fn port_scan_timeout(&self) -> Duration {
        Duration::from_millis(self.port_scan_timeout_ms)
    }

    pub fn pool_interval(&self) -> Duration {
        Duration::from_millis(self.pool_interval_ms)
    }

    pub fn load_interval(&self) -> Duration {
        Duration::from_millis(self.load_interval_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

/// Struct used to deserialize the options specified within the config file.
/// Unset fields keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    timing_lower_bound_ms: Option<u64>,
    timing_upper_bound_ms: Option<u64>,
    head_timeout_ms: Option<u64>,
    socket_timeout_ms: Option<u64>,
    fetch_timeout_ms: Option<u64>,
    resource_timeout_ms: Option<u64>,
    port_scan_timeout_ms: Option<u64>,
    pool_cap: Option<usize>,
    pool_interval_ms: Option<u64>,
    max_concurrent_loads: Option<usize>,
    load_interval_ms: Option<u64>,
    stun_server: Option<String>,
    discovery_timeout_ms: Option<u64>,
    max_expanded_addresses: Option<usize>,
}

impl ConfigFile {
    /// Reads the configuration file in TOML format. A missing file is not an
    /// error, a file that does not parse is.
    ///
    /// # Format
    ///
    /// port_scan_timeout_ms = 3000
    /// pool_cap = 64
    /// stun_server = "stun.example.org:3478"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Option<Self>, ScanError> {
        let Some(config_path) = custom_config_path.or_else(default_config_path) else {
            return Ok(None);
        };
        if !config_path.exists() {
            return Ok(None);
        }

        debug!("Reading configuration from {}", config_path.display());
        let content = fs::read_to_string(&config_path)?;
        Self::parse(&content).map(Some)
    }

    pub fn parse(content: &str) -> Result<Self, ScanError> {
        toml::from_str(content).map_err(|e| ScanError::Config(e.to_string()))
    }
}

/// Constructs default path to config toml, `None` without a home directory.
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".netsweep.toml");
    Some(config_path)
}
