//! Bearer configuration (`bearer.*`).

use serde::{Deserialize, Serialize};

/// Default UDP bind address.
const DEFAULT_UDP_BIND_ADDR: &str = "0.0.0.0:4000";

/// UDP bearer configuration (`bearer.udp.*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UdpConfig {
    /// Bind address (`bind_addr`). Defaults to "0.0.0.0:4000".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,

    /// Peers every outgoing PDU is sent to (`peers`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<String>,
}

impl UdpConfig {
    /// Get the bind address, using default if not configured.
    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or(DEFAULT_UDP_BIND_ADDR)
    }
}

/// Bearer configuration (`bearer.*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BearerConfig {
    #[serde(default)]
    pub udp: UdpConfig,
    /// Retries of a send refused with a transient error (`max_send_retries`).
    #[serde(default = "BearerConfig::default_max_send_retries")]
    pub max_send_retries: u32,
    /// Backoff before the first retry (`retry_base_ms`).
    #[serde(default = "BearerConfig::default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Cap on the exponential backoff (`retry_max_ms`).
    #[serde(default = "BearerConfig::default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            udp: UdpConfig::default(),
            max_send_retries: 3,
            retry_base_ms: 100,
            retry_max_ms: 2_000,
        }
    }
}

impl BearerConfig {
    fn default_max_send_retries() -> u32 { 3 }
    fn default_retry_base_ms() -> u64 { 100 }
    fn default_retry_max_ms() -> u64 { 2_000 }

    /// Backoff before retry number `attempt` (0-based).
    pub fn retry_delay_ms(&self, attempt: u32) -> u64 {
        self.retry_base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.retry_max_ms)
    }
}
