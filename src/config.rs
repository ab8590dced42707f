//! Settings of the proxy, as deserialized by whatever front end loads them.

use serde::{de, Deserialize, Deserializer};
use std::{path::PathBuf, time::Duration};

use crate::{AddressFamily, Endpoint, DEFAULT_TIMEOUT};

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

/// Socket timeouts of zero are rejected by the OS
fn non_zero_secs<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    if secs == 0 {
        return Err(de::Error::custom("timeout_secs must be at least 1"));
    }
    Ok(secs)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyConfig {
    /// Control socket of the IPv4 daemon
    pub bird_socket: Endpoint,
    /// Control socket of the IPv6 daemon
    pub bird6_socket: Endpoint,
    /// Where uploaded configuration files are stored
    pub config_folder: PathBuf,
    #[serde(default = "default_timeout_secs", deserialize_with = "non_zero_secs")]
    pub timeout_secs: u64,
}

impl ProxyConfig {
    pub fn endpoint(&self, family: AddressFamily) -> &Endpoint {
        match family {
            AddressFamily::Ipv4 => &self.bird_socket,
            AddressFamily::Ipv6 => &self.bird6_socket,
        }
    }

    /// The configured timeout, at least one second
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
