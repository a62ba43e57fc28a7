//! Configuration loading and validation
//!
//! Two JSON files, both optional to the process but `proxy.json` fatal if
//! unreadable: `appsettings.json` supplies logging config, `proxy.json`
//! supplies the listen endpoint and the friendly-name mapping table.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

/// `appsettings.json` — opaque to the core, consumed only by
/// `util::init_tracing`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl LoggingConfig {
    /// Read `path`; a missing file is not an error — it falls back to
    /// defaults and logs at info level once logging is up.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("warning: failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// One entry of `proxy.json`'s `IPAddressMappings` array.
#[derive(Debug, Clone, Deserialize)]
pub struct IpAddressMapping {
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "FriendlyName")]
    pub friendly_name: String,
}

/// `proxy.json` — the listen endpoint and label map. Absence is a fatal,
/// diagnostic-bearing error since it supplies the listen address.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "ListenIPAddress")]
    pub listen_ip_address: String,
    #[serde(rename = "ListenPort")]
    pub listen_port: u16,
    #[serde(rename = "IPAddressMappings", default)]
    pub ip_address_mappings: Vec<IpAddressMapping>,
}

impl ProxyConfig {
    /// Read and parse `path`, failing with the full resolved path named in
    /// the error context.
    pub fn load(path: &Path) -> Result<Self> {
        let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", resolved.display()))?;

        let config: ProxyConfig = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", resolved.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.listen_ip_address.trim().is_empty() {
            anyhow::bail!("ListenIPAddress must not be empty");
        }
        self.listen_ip_address
            .parse::<IpAddr>()
            .with_context(|| format!("ListenIPAddress {:?} is not a valid IP literal", self.listen_ip_address))?;

        if self.listen_port == 0 {
            anyhow::bail!("ListenPort must be in 1..65535");
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(
            self.listen_ip_address.parse().expect("validated in load()"),
            self.listen_port,
        )
    }
}
